//! Priority-ordered pending set
//!
//! Jobs are ordered by `(priority weight desc, created_at asc)`. Selection
//! scans in order and returns the first job the caller's admission filter
//! accepts, so a large job at the head never stalls smaller work behind it.
//! Starvation of passed-over jobs is countered by promoting them one
//! priority tier after a configured number of consecutive denials.

use crate::job::{Job, JobId, JobPriority, ResourceRequirements};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// One pending job as seen by the queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Job id
    pub job_id: JobId,

    /// Base priority from the job
    pub priority: JobPriority,

    /// Creation time, used for FIFO ordering within a tier
    pub created_at: DateTime<Utc>,

    /// Requirements handed to the admission filter
    pub requirements: ResourceRequirements,

    /// Earliest eligible dispatch time (retry backoff)
    pub retry_at: Option<DateTime<Utc>>,

    /// Consecutive dispatch cycles this entry was denied admission
    denied_cycles: u32,

    /// Tiers gained through starvation promotion
    promoted_tiers: u8,
}

impl QueueEntry {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            priority: job.priority,
            created_at: job.created_at,
            requirements: job.options.resources,
            retry_at: job.retry_at,
            denied_cycles: 0,
            promoted_tiers: 0,
        }
    }

    /// Ordering weight including starvation promotion, capped at urgent
    pub fn effective_weight(&self) -> u8 {
        (self.priority.weight() + self.promoted_tiers).min(JobPriority::max_weight())
    }

    fn eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.retry_at.map_or(true, |at| at <= now)
    }
}

fn compare(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.effective_weight()
        .cmp(&a.effective_weight())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.job_id.cmp(&b.job_id))
}

/// The pending set.
#[derive(Debug)]
pub struct PendingQueue {
    entries: Vec<QueueEntry>,
    starvation_threshold: u32,
}

impl PendingQueue {
    /// Create a queue with the given starvation promotion threshold.
    ///
    /// A threshold of zero disables promotion.
    pub fn new(starvation_threshold: u32) -> Self {
        Self {
            entries: Vec::new(),
            starvation_threshold,
        }
    }

    /// Insert a pending job
    pub fn enqueue(&mut self, job: &Job) {
        self.entries.push(QueueEntry::from_job(job));
    }

    /// Remove a job by id
    pub fn remove(&mut self, job_id: JobId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.job_id != job_id);
        self.entries.len() < before
    }

    /// Check whether a job is queued
    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.iter().any(|e| e.job_id == job_id)
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue depth per base priority
    pub fn size_by_priority(&self) -> HashMap<JobPriority, usize> {
        let mut sizes = HashMap::new();
        for entry in &self.entries {
            *sizes.entry(entry.priority).or_insert(0) += 1;
        }
        sizes
    }

    /// First eligible entry the filter accepts, in priority order,
    /// without removing it or touching starvation counters.
    pub fn peek<F>(&self, now: DateTime<Utc>, mut filter: F) -> Option<JobId>
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        let order = self.scan_order();
        for idx in order {
            let entry = &self.entries[idx];
            if entry.eligible_at(now) && filter(entry) {
                return Some(entry.job_id);
            }
        }
        None
    }

    /// Remove and return the first eligible entry the admission filter
    /// accepts, scanning in `(effective weight desc, created_at asc)`
    /// order.
    ///
    /// Entries the filter rejects accrue a denied cycle; after
    /// `starvation_threshold` consecutive denials an entry is promoted
    /// one priority tier (capped at urgent) and its counter resets.
    pub fn take_admissible<F>(&mut self, now: DateTime<Utc>, mut admit: F) -> Option<JobId>
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        let order = self.scan_order();
        for idx in order {
            if !self.entries[idx].eligible_at(now) {
                continue;
            }
            if admit(&self.entries[idx]) {
                let entry = self.entries.remove(idx);
                return Some(entry.job_id);
            }

            let threshold = self.starvation_threshold;
            let entry = &mut self.entries[idx];
            entry.denied_cycles += 1;
            if threshold > 0
                && entry.denied_cycles >= threshold
                && entry.effective_weight() < JobPriority::max_weight()
            {
                entry.denied_cycles = 0;
                entry.promoted_tiers += 1;
                debug!(
                    job_id = %entry.job_id,
                    priority = %entry.priority,
                    promoted_tiers = entry.promoted_tiers,
                    "promoted starving job one priority tier"
                );
            }
        }
        None
    }

    fn scan_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|&a, &b| compare(&self.entries[a], &self.entries[b]));
        order
    }
}
