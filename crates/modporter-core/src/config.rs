//! Service configuration

use crate::allocator::ResourceTotals;
use crate::job::JobType;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the job queue service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of executor slots in the worker pool
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Default execution deadline for jobs that do not set one
    #[serde(default = "default_job_timeout_ms")]
    pub default_job_timeout_ms: u64,

    /// Dispatch loop tick interval
    #[serde(default = "default_queue_processing_interval_ms")]
    pub queue_processing_interval_ms: u64,

    /// Upper bound on pending + running jobs
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,

    /// Upper bound on retained history rows, evicted oldest-first
    #[serde(default = "default_max_job_history")]
    pub max_job_history: usize,

    /// Consecutive denied dispatch cycles before a pending job is
    /// promoted one priority tier
    #[serde(default = "default_starvation_threshold_cycles")]
    pub starvation_threshold_cycles: u32,

    /// How long `stop()` waits for running jobs to drain
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// How long a cancel-signalled worker may keep running before its
    /// slot is poisoned and recycled
    #[serde(default = "default_poison_grace_ms")]
    pub poison_grace_ms: u64,

    /// Capacity of the event broadcast buffer per subscriber
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Process-wide resource totals used for admission
    #[serde(default)]
    pub resources: ResourceTotals,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_job_timeout_ms: default_job_timeout_ms(),
            queue_processing_interval_ms: default_queue_processing_interval_ms(),
            backlog_limit: default_backlog_limit(),
            max_job_history: default_max_job_history(),
            starvation_threshold_cycles: default_starvation_threshold_cycles(),
            stop_grace_ms: default_stop_grace_ms(),
            poison_grace_ms: default_poison_grace_ms(),
            event_buffer: default_event_buffer(),
            resources: ResourceTotals::default(),
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Development configuration (small pool, fast ticks)
    pub fn development() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_processing_interval_ms: 50,
            cleanup: CleanupConfig {
                cleanup_interval_ms: 60_000,
                retention_hours: 1,
            },
            ..Self::default()
        }
    }

    /// Production configuration (larger pool, more retries)
    pub fn production() -> Self {
        Self {
            max_concurrent_jobs: 8,
            retry: RetryConfig {
                max_retries: 3,
                ..RetryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }
        if self.backlog_limit == 0 {
            anyhow::bail!("backlog_limit must be at least 1");
        }
        if self.default_job_timeout_ms == 0 {
            anyhow::bail!("default_job_timeout_ms must be non-zero");
        }
        if self.resources.memory_mb == 0
            || self.resources.cpu_slots == 0
            || self.resources.disk_mb == 0
        {
            anyhow::bail!("resource totals must be non-zero in every dimension");
        }
        Ok(())
    }

    /// Dispatch tick interval as a Duration
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.queue_processing_interval_ms)
    }

    /// Stop grace window as a Duration
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Poison grace window as a Duration
    pub fn poison_grace(&self) -> Duration {
        Duration::from_millis(self.poison_grace_ms)
    }

    /// Retention window as a chrono Duration
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cleanup.retention_hours as i64)
    }

    /// Cleanup scan interval as a Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup.cleanup_interval_ms)
    }

    /// Build the retry delay policy from the retry section
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry.max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::Exponential(
            ExponentialBackoff::new(
                Duration::from_millis(self.retry.retry_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
                self.retry.backoff_multiplier,
            )
            .with_jitter(self.retry.jitter),
        )
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Default retry budget for jobs that do not set one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Cap on the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier per consumed retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 - 1.0)
    #[serde(default)]
    pub jitter: f64,

    /// Job types for which a timeout consumes a retry instead of being
    /// terminal
    #[serde(default)]
    pub retry_on_timeout_types: Vec<JobType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: 0.0,
            retry_on_timeout_types: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Check whether a timeout for this type consumes a retry
    pub fn retries_on_timeout(&self, job_type: JobType) -> bool {
        self.retry_on_timeout_types.contains(&job_type)
    }
}

/// Cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Interval between cleanup scans
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Retention window for terminal jobs
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval_ms(),
            retention_hours: default_retention_hours(),
        }
    }
}

// Default value helper functions
fn default_max_concurrent_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 8)
}
fn default_job_timeout_ms() -> u64 {
    300_000
}
fn default_queue_processing_interval_ms() -> u64 {
    100
}
fn default_backlog_limit() -> usize {
    10_000
}
fn default_max_job_history() -> usize {
    10_000
}
fn default_starvation_threshold_cycles() -> u32 {
    50
}
fn default_stop_grace_ms() -> u64 {
    30_000
}
fn default_poison_grace_ms() -> u64 {
    5_000
}
fn default_event_buffer() -> usize {
    256
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_cleanup_interval_ms() -> u64 {
    3_600_000
}
fn default_retention_hours() -> u64 {
    24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_concurrent_jobs >= 2);
        assert!(config.max_concurrent_jobs <= 8);
        assert_eq!(config.backlog_limit, 10_000);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_presets() {
        let dev = ServiceConfig::development();
        assert_eq!(dev.max_concurrent_jobs, 2);
        assert_eq!(dev.cleanup.retention_hours, 1);

        let prod = ServiceConfig::production();
        assert_eq!(prod.max_concurrent_jobs, 8);
        assert_eq!(prod.retry.max_retries, 3);
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let mut config = ServiceConfig::default();
        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.resources.cpu_slots = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ServiceConfig::default();
        let policy = config.retry_policy();
        assert_eq!(
            policy.delay_for(0),
            Some(Duration::from_millis(1_000))
        );
        assert_eq!(
            policy.delay_for(1),
            Some(Duration::from_millis(2_000))
        );

        let mut config = ServiceConfig::default();
        config.retry.max_retries = 0;
        assert_eq!(config.retry_policy().delay_for(0), None);
    }

    #[test]
    fn test_timeout_retry_opt_in() {
        let mut config = ServiceConfig::default();
        assert!(!config.retry.retries_on_timeout(JobType::Conversion));

        config.retry.retry_on_timeout_types.push(JobType::Conversion);
        assert!(config.retry.retries_on_timeout(JobType::Conversion));
        assert!(!config.retry.retries_on_timeout(JobType::Packaging));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ServiceConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: ServiceConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.backlog_limit, config.backlog_limit);
        assert_eq!(parsed.resources, config.resources);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: ServiceConfig = toml::from_str("max_concurrent_jobs = 3").unwrap();
        assert_eq!(parsed.max_concurrent_jobs, 3);
        assert_eq!(parsed.backlog_limit, 10_000);
        assert_eq!(parsed.retry.retry_delay_ms, 1_000);
    }
}
