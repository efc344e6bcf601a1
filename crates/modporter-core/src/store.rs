//! In-memory job status store
//!
//! Holds current job records and the append-only status history. Reads
//! return snapshots; writes serialize on a single lock so a status and its
//! history row are always observed together. Durability is delegated to an
//! optional write-through hook whose failures are logged and swallowed —
//! a slow disk never blocks dispatch.

use crate::error::{Error, Result};
use crate::job::{Job, JobFilter, JobId, JobStatus, JobStatusUpdate};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Optional write-through persistence hook.
///
/// Implementations are best-effort: the store invokes them
/// fire-and-forget and logs failures without propagating them.
#[async_trait]
pub trait PersistenceHook: Send + Sync {
    /// Persist the current state of a job
    async fn write_job(&self, job: &Job) -> anyhow::Result<()>;

    /// Remove a job record
    async fn delete_job(&self, job_id: JobId) -> anyhow::Result<()>;

    /// Append one history row
    async fn append_history(&self, update: &JobStatusUpdate) -> anyhow::Result<()>;
}

/// Aggregate store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total job records held
    pub total: usize,

    /// Jobs per status
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,

    /// Retained history rows
    pub history_entries: usize,
}

struct StoreInner {
    jobs: HashMap<JobId, Job>,
    history: VecDeque<JobStatusUpdate>,
}

/// The job status store.
pub struct JobStatusStore {
    inner: RwLock<StoreInner>,
    hook: Option<Arc<dyn PersistenceHook>>,
    max_history: usize,
}

impl JobStatusStore {
    /// Create a store retaining at most `max_history` history rows
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                jobs: HashMap::new(),
                history: VecDeque::new(),
            }),
            hook: None,
            max_history,
        }
    }

    /// Attach a write-through persistence hook
    pub fn with_hook(mut self, hook: Arc<dyn PersistenceHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Save a new job and append its initial history row.
    ///
    /// Fails with `Capacity` when the backlog (pending + running) is
    /// already at `backlog_limit`; the check and the insert happen under
    /// one lock so concurrent enqueues cannot overshoot.
    pub fn save_bounded(&self, job: Job, backlog_limit: usize) -> Result<()> {
        let row = JobStatusUpdate::from_job(&job);
        {
            let mut inner = self.inner.write().expect("store lock poisoned");
            let backlog = inner
                .jobs
                .values()
                .filter(|j| j.status.is_active())
                .count();
            if backlog >= backlog_limit {
                return Err(Error::Capacity(backlog_limit));
            }
            inner.jobs.insert(job.id, job.clone());
            push_history(&mut inner, row.clone(), self.max_history);
        }
        self.persist_job(job);
        self.persist_history(row);
        Ok(())
    }

    /// Save a new job without a backlog bound (tests, tooling)
    pub fn save(&self, job: Job) {
        let row = JobStatusUpdate::from_job(&job);
        {
            let mut inner = self.inner.write().expect("store lock poisoned");
            inner.jobs.insert(job.id, job.clone());
            push_history(&mut inner, row.clone(), self.max_history);
        }
        self.persist_job(job);
        self.persist_history(row);
    }

    /// Replace a job's record and append the matching history row.
    ///
    /// There is no implicit creation: updating an unknown id fails with
    /// `NotFound`.
    pub fn update(&self, job: Job) -> Result<()> {
        let row = JobStatusUpdate::from_job(&job);
        {
            let mut inner = self.inner.write().expect("store lock poisoned");
            if !inner.jobs.contains_key(&job.id) {
                return Err(Error::NotFound(job.id));
            }
            inner.jobs.insert(job.id, job.clone());
            push_history(&mut inner, row.clone(), self.max_history);
        }
        self.persist_job(job);
        self.persist_history(row);
        Ok(())
    }

    /// Atomically move a pending job to `running`.
    ///
    /// Returns the updated snapshot, or `None` when the job is no longer
    /// dispatchable (already transitioned, or a cancel marker arrived
    /// while it was still pending). Mutating in place keeps a
    /// concurrently-set `cancel_requested` marker intact.
    pub fn transition_running(&self, job_id: JobId) -> Result<Option<Job>> {
        let (job, row) = {
            let mut inner = self.inner.write().expect("store lock poisoned");
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                return Err(Error::NotFound(job_id));
            };
            if job.status != JobStatus::Pending || job.cancel_requested {
                return Ok(None);
            }
            job.mark_running();
            let job = job.clone();
            let row = JobStatusUpdate::from_job(&job);
            push_history(&mut inner, row.clone(), self.max_history);
            (job, row)
        };
        self.persist_job(job.clone());
        self.persist_history(row);
        Ok(Some(job))
    }

    /// Record a progress change for a running job.
    ///
    /// Appends a history row only when the value actually changed and
    /// the job is still running; returns whether a change was recorded.
    pub fn update_progress(&self, job_id: JobId, progress: u8) -> Result<bool> {
        let progress = progress.min(100);
        let (job, row) = {
            let mut inner = self.inner.write().expect("store lock poisoned");
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                return Err(Error::NotFound(job_id));
            };
            if job.status != JobStatus::Running || job.progress == progress {
                return Ok(false);
            }
            job.progress = progress;
            let job = job.clone();
            let row = JobStatusUpdate::from_job(&job);
            push_history(&mut inner, row.clone(), self.max_history);
            (job, row)
        };
        self.persist_job(job);
        self.persist_history(row);
        Ok(true)
    }

    /// Set the cancel-requested marker on a running job.
    ///
    /// The marker is not a status change, so no history row is appended.
    pub fn set_cancel_requested(&self, job_id: JobId) -> Result<()> {
        let job = {
            let mut inner = self.inner.write().expect("store lock poisoned");
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                return Err(Error::NotFound(job_id));
            };
            job.cancel_requested = true;
            job.clone()
        };
        self.persist_job(job);
        Ok(())
    }

    /// Snapshot of a job
    pub fn get(&self, job_id: JobId) -> Option<Job> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .jobs
            .get(&job_id)
            .cloned()
    }

    /// Remove a job record; returns whether it existed
    pub fn delete(&self, job_id: JobId) -> bool {
        let removed = self
            .inner
            .write()
            .expect("store lock poisoned")
            .jobs
            .remove(&job_id)
            .is_some();
        if removed {
            self.persist_delete(job_id);
        }
        removed
    }

    /// Jobs matching a filter, oldest first
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }

    /// History rows, optionally scoped to one job, chronological order.
    ///
    /// With a limit, the most recent rows win.
    pub fn history(&self, job_id: Option<JobId>, limit: Option<usize>) -> Vec<JobStatusUpdate> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut rows: Vec<JobStatusUpdate> = inner
            .history
            .iter()
            .filter(|row| job_id.map_or(true, |id| row.job_id == id))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if rows.len() > limit {
                rows.drain(..rows.len() - limit);
            }
        }
        rows
    }

    /// Aggregate counters
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut stats = StoreStats {
            total: inner.jobs.len(),
            history_entries: inner.history.len(),
            ..StoreStats::default()
        };
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Pending + running jobs (the backlog)
    pub fn count_active(&self) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .jobs
            .values()
            .filter(|j| j.status.is_active())
            .count()
    }

    /// Delete terminal jobs older than the retention window.
    ///
    /// Running jobs are never touched — the terminal-state check is the
    /// guard. Returns how many records were removed.
    pub fn cleanup(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let removed: Vec<JobId> = {
            let mut inner = self.inner.write().expect("store lock poisoned");
            let ids: Vec<JobId> = inner
                .jobs
                .values()
                .filter(|job| job.status.is_terminal() && job.created_at < cutoff)
                .map(|job| job.id)
                .collect();
            for id in &ids {
                inner.jobs.remove(id);
            }
            ids
        };
        if !removed.is_empty() {
            debug!(count = removed.len(), "cleaned up terminal jobs");
        }
        for id in &removed {
            self.persist_delete(*id);
        }
        removed.len()
    }

    fn persist_job(&self, job: Job) {
        if let Some(hook) = &self.hook {
            let hook = hook.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.write_job(&job).await {
                    warn!(job_id = %job.id, error = %e, "persistence hook failed to write job");
                }
            });
        }
    }

    fn persist_history(&self, row: JobStatusUpdate) {
        if let Some(hook) = &self.hook {
            let hook = hook.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.append_history(&row).await {
                    warn!(job_id = %row.job_id, error = %e, "persistence hook failed to append history");
                }
            });
        }
    }

    fn persist_delete(&self, job_id: JobId) {
        if let Some(hook) = &self.hook {
            let hook = hook.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.delete_job(job_id).await {
                    warn!(job_id = %job_id, error = %e, "persistence hook failed to delete job");
                }
            });
        }
    }
}

fn push_history(inner: &mut StoreInner, row: JobStatusUpdate, max_history: usize) {
    inner.history.push_back(row);
    while inner.history.len() > max_history {
        inner.history.pop_front();
    }
}
