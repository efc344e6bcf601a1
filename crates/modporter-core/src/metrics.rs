//! Execution metrics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters shared by the worker pool and the service.
#[derive(Debug)]
pub struct ServiceMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    retries: AtomicU64,
    total_latency_ms: AtomicU64,
    started_at: Instant,
}

impl ServiceMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a successful attempt and its latency
    pub fn record_completed(&self, latency_ms: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Record a failed attempt
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled attempt
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deadline expiry
    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry re-entry
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent summary snapshot
    pub fn summary(&self) -> MetricsSummary {
        let completed = self.completed.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();

        MetricsSummary {
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            avg_latency_ms: if completed > 0 {
                total_latency_ms / completed
            } else {
                0
            },
            throughput_per_min: if elapsed_secs > 0.0 {
                completed as f64 * 60.0 / elapsed_secs
            } else {
                0.0
            },
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    /// Successfully completed attempts
    pub completed: u64,

    /// Failed attempts (including ones later retried)
    pub failed: u64,

    /// Cancelled attempts
    pub cancelled: u64,

    /// Attempts that hit their deadline
    pub timed_out: u64,

    /// Retry re-entries
    pub retries: u64,

    /// Mean latency of completed attempts
    pub avg_latency_ms: u64,

    /// Completions per minute since startup
    pub throughput_per_min: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_latency() {
        let metrics = ServiceMetrics::new();
        metrics.record_completed(100);
        metrics.record_completed(300);
        metrics.record_failed();
        metrics.record_timed_out();
        metrics.record_retry();

        let summary = metrics.summary();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.avg_latency_ms, 200);
        assert!(summary.throughput_per_min > 0.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = ServiceMetrics::new().summary();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.avg_latency_ms, 0);
    }
}
