//! Job queue service
//!
//! The public façade over the store, allocator, queue, and worker pool.
//! A single dispatch loop moves work from pending to running whenever a
//! tick fires or an event (enqueue, completion, release, resume) wakes it.
//! Every job state transition goes through here: the store write and
//! resource release happen before the corresponding event is emitted, so
//! observers always see a consistent world.

use crate::allocator::{ResourceAllocator, ResourceLedger};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, JobEvent};
use crate::job::{Job, JobFailure, JobFilter, JobId, JobOptions, JobPriority, JobStatus, JobStatusUpdate, NewJob};
use crate::metrics::{MetricsSummary, ServiceMetrics};
use crate::pool::{ConversionPipeline, WorkerOutcome, WorkerPool};
use crate::queue::PendingQueue;
use crate::retry::RetryPolicy;
use crate::store::{JobStatusStore, PersistenceHook, StoreStats};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Aggregate service statistics
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Job counts from the store
    pub jobs: StoreStats,

    /// Pending queue depth per priority
    pub queue_depth_by_priority: HashMap<JobPriority, usize>,

    /// Resource ledger snapshot
    pub ledger: ResourceLedger,

    /// Execution counters and timings
    pub execution: MetricsSummary,

    /// Executor slots ready for work
    pub idle_workers: usize,

    /// Executor slots running a job
    pub busy_workers: usize,

    /// Whether dispatch is paused
    pub paused: bool,
}

/// What the service decided to do with a finished attempt.
enum Transition {
    Complete(serde_json::Value),
    Cancel,
    Retry { failure: JobFailure, delay: Duration },
    Fail(JobFailure),
}

struct ServiceInner {
    config: ServiceConfig,
    store: JobStatusStore,
    queue: Mutex<PendingQueue>,
    allocator: Mutex<ResourceAllocator>,
    pool: WorkerPool,
    events: EventBus,
    metrics: Arc<ServiceMetrics>,
    retry_policy: RetryPolicy,
    wakeup: Notify,
    paused: AtomicBool,
    stopping: AtomicBool,
    shutdown: CancellationToken,
}

/// The conversion job orchestration service.
///
/// Constructed from its configuration with the pipeline (and optionally a
/// persistence hook) injected; owns the dispatch and cleanup loops once
/// `start()` is called.
pub struct JobQueueService {
    inner: Arc<ServiceInner>,
    dispatch_handle: StdMutex<Option<JoinHandle<()>>>,
    cleanup_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl JobQueueService {
    /// Create a service without persistence
    pub fn new(config: ServiceConfig, pipeline: Arc<dyn ConversionPipeline>) -> Self {
        Self::build(config, pipeline, None)
    }

    /// Create a service with a write-through persistence hook
    pub fn with_persistence(
        config: ServiceConfig,
        pipeline: Arc<dyn ConversionPipeline>,
        hook: Arc<dyn PersistenceHook>,
    ) -> Self {
        Self::build(config, pipeline, Some(hook))
    }

    fn build(
        config: ServiceConfig,
        pipeline: Arc<dyn ConversionPipeline>,
        hook: Option<Arc<dyn PersistenceHook>>,
    ) -> Self {
        let metrics = Arc::new(ServiceMetrics::new());
        let mut store = JobStatusStore::new(config.max_job_history);
        if let Some(hook) = hook {
            store = store.with_hook(hook);
        }
        let pool = WorkerPool::new(
            pipeline,
            config.max_concurrent_jobs,
            config.poison_grace(),
            metrics.clone(),
        );
        let retry_policy = config.retry_policy();
        let queue = Mutex::new(PendingQueue::new(config.starvation_threshold_cycles));
        let allocator = Mutex::new(ResourceAllocator::new(config.resources));
        let events = EventBus::new(config.event_buffer);

        let inner = Arc::new(ServiceInner {
            config,
            store,
            queue,
            allocator,
            pool,
            events,
            metrics,
            retry_policy,
            wakeup: Notify::new(),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        Self {
            inner,
            dispatch_handle: StdMutex::new(None),
            cleanup_handle: StdMutex::new(None),
        }
    }

    /// Spawn the dispatch and cleanup loops. Idempotent.
    pub fn start(&self) {
        let mut dispatch = self.dispatch_handle.lock().expect("handle lock poisoned");
        if dispatch.is_some() {
            return;
        }
        info!(
            workers = self.inner.config.max_concurrent_jobs,
            backlog_limit = self.inner.config.backlog_limit,
            "starting job queue service"
        );
        *dispatch = Some(tokio::spawn(dispatch_loop(self.inner.clone())));
        *self.cleanup_handle.lock().expect("handle lock poisoned") =
            Some(tokio::spawn(cleanup_loop(self.inner.clone())));
    }

    /// Accept a job into the backlog.
    ///
    /// The job is observable via `status()` as soon as this returns.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<JobId> {
        validate_options(&new_job.options)?;

        let job = Job::new(new_job);
        let job_id = job.id;
        self.inner
            .store
            .save_bounded(job.clone(), self.inner.config.backlog_limit)?;
        self.inner.queue.lock().await.enqueue(&job);
        self.inner.events.emit(JobEvent::Created {
            job_id,
            job_type: job.job_type,
            priority: job.priority,
            timestamp: Utc::now(),
        });
        self.inner.wakeup.notify_one();

        debug!(
            job_id = %job_id,
            job_type = %job.job_type,
            priority = %job.priority,
            "job enqueued"
        );
        Ok(job_id)
    }

    /// Cancel a job.
    ///
    /// Pending jobs are cancelled immediately. Running jobs are
    /// cancel-signalled and stay `running` (with `cancel_requested` set)
    /// until the worker reports back, so concurrent cancels are
    /// idempotent. Returns `false` once the job is terminal.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool> {
        let job = self
            .inner
            .store
            .get(job_id)
            .ok_or(Error::NotFound(job_id))?;

        match job.status {
            JobStatus::Pending => {
                if self.inner.queue.lock().await.remove(job_id) {
                    let cancelled = self.inner.cancel_pending(job_id)?;
                    self.inner.wakeup.notify_one();
                    Ok(cancelled)
                } else {
                    // The dispatch loop took it in the meantime; fall back
                    // to the running-job path.
                    self.inner.request_running_cancel(job_id)
                }
            }
            JobStatus::Running => self.inner.request_running_cancel(job_id),
            _ => Ok(false),
        }
    }

    /// Snapshot of a job, if known
    pub fn status(&self, job_id: JobId) -> Option<Job> {
        self.inner.store.get(job_id)
    }

    /// Jobs matching a filter
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.inner.store.list(filter)
    }

    /// Status history, optionally scoped to one job
    pub fn history(&self, job_id: Option<JobId>, limit: Option<usize>) -> Vec<JobStatusUpdate> {
        self.inner.store.history(job_id, limit)
    }

    /// Aggregate counts and timings
    pub async fn stats(&self) -> ServiceStats {
        let queue_depth_by_priority = self.inner.queue.lock().await.size_by_priority();
        let ledger = self.inner.allocator.lock().await.snapshot();
        ServiceStats {
            jobs: self.inner.store.stats(),
            queue_depth_by_priority,
            ledger,
            execution: self.inner.metrics.summary(),
            idle_workers: self.inner.pool.idle_count(),
            busy_workers: self.inner.pool.busy_count(),
            paused: self.is_paused(),
        }
    }

    /// Register an event observer
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Suspend all dispatch, including retry re-entry.
    ///
    /// Enqueue, cancel, and queries keep working.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("dispatch paused");
    }

    /// Resume dispatch
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
        info!("dispatch resumed");
    }

    /// Check whether dispatch is paused
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: stop dispatching, cancel-signal running jobs,
    /// wait out the stop grace for the pool to drain, release all
    /// reservations, and terminate the loops.
    ///
    /// Pending jobs are left pending.
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        info!("stopping job queue service");

        self.inner.pool.cancel_all();
        if tokio::time::timeout(self.inner.config.stop_grace(), self.inner.pool.drain())
            .await
            .is_err()
        {
            warn!("stop grace elapsed before all workers drained");
        }

        // Let in-flight completion handlers finish their store writes.
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while self.inner.store.stats().running > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        self.inner.allocator.lock().await.release_all();
        self.inner.shutdown.cancel();

        let dispatch = self
            .dispatch_handle
            .lock()
            .expect("handle lock poisoned")
            .take();
        if let Some(handle) = dispatch {
            let _ = handle.await;
        }
        let cleanup = self
            .cleanup_handle
            .lock()
            .expect("handle lock poisoned")
            .take();
        if let Some(handle) = cleanup {
            let _ = handle.await;
        }

        info!("job queue service stopped");
    }
}

impl Drop for JobQueueService {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if let Ok(mut guard) = self.dispatch_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        if let Ok(mut guard) = self.cleanup_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn validate_options(options: &JobOptions) -> Result<()> {
    if options.timeout_ms == Some(0) {
        return Err(Error::InvalidOptions(
            "timeout_ms must be non-zero".to_string(),
        ));
    }
    if options.resources.is_empty() {
        return Err(Error::InvalidOptions(
            "resource requirements must request at least one resource".to_string(),
        ));
    }
    Ok(())
}

async fn dispatch_loop(inner: Arc<ServiceInner>) {
    let mut tick = tokio::time::interval(inner.config.dispatch_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wakeup.notified() => {}
            _ = tick.tick() => {}
        }
        if inner.paused.load(Ordering::SeqCst) || inner.stopping.load(Ordering::SeqCst) {
            continue;
        }
        // Failure barrier: a poisoned job must never halt the service.
        if let Err(e) = inner.dispatch_cycle().await {
            error!(error = %e, "dispatch cycle failed");
        }
    }
    debug!("dispatch loop terminated");
}

async fn cleanup_loop(inner: Arc<ServiceInner>) {
    let mut tick = tokio::time::interval(inner.config.cleanup_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so cleanup waits a full
    // interval after startup.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        let removed = inner.store.cleanup(inner.config.retention());
        if removed > 0 {
            info!(count = removed, "cleanup removed expired jobs");
        }
    }
    debug!("cleanup loop terminated");
}

impl ServiceInner {
    /// One pass over the pending set: admit and dispatch jobs until the
    /// queue has nothing admissible or no slot is free.
    async fn dispatch_cycle(self: &Arc<Self>) -> Result<()> {
        loop {
            if self.paused.load(Ordering::SeqCst) || self.stopping.load(Ordering::SeqCst) {
                break;
            }
            if self.pool.idle_count() == 0 {
                break;
            }

            let taken = {
                let mut queue = self.queue.lock().await;
                let mut allocator = self.allocator.lock().await;
                let now = Utc::now();
                queue.take_admissible(now, |entry| {
                    allocator
                        .try_reserve(entry.job_id, &entry.requirements)
                        .is_granted()
                })
            };

            let Some(job_id) = taken else { break };
            if let Err(e) = self.dispatch_job(job_id).await {
                error!(job_id = %job_id, error = %e, "failed to dispatch job");
                self.allocator.lock().await.release(job_id);
                self.fail_job_internal(job_id, &e);
            }
        }
        Ok(())
    }

    /// Hand an admitted job to the pool and wire up progress and
    /// completion handling.
    async fn dispatch_job(self: &Arc<Self>, job_id: JobId) -> Result<()> {
        let job = match self.store.transition_running(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                // No longer dispatchable: transitioned concurrently, or a
                // cancel marker arrived while it was still pending.
                self.allocator.lock().await.release(job_id);
                if let Some(parked) = self.store.get(job_id) {
                    if parked.status == JobStatus::Pending && parked.cancel_requested {
                        self.cancel_pending(job_id)?;
                    }
                }
                return Ok(());
            }
            Err(_) => {
                // Cleaned up between admission and dispatch.
                self.allocator.lock().await.release(job_id);
                return Ok(());
            }
        };
        self.events.emit(JobEvent::Updated {
            job_id,
            old_status: JobStatus::Pending,
            new_status: JobStatus::Running,
            progress: job.progress,
            timestamp: Utc::now(),
        });

        let timeout = job
            .options
            .resolved_timeout(self.config.default_job_timeout_ms);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let outcome_rx = self.pool.submit(job, timeout, progress_tx)?;

        // Close the race with a cancel() that observed `pending` after
        // the queue entry was already taken.
        if let Some(fresh) = self.store.get(job_id) {
            if fresh.cancel_requested {
                self.pool.cancel(job_id);
            }
        }

        let progress_inner = self.clone();
        tokio::spawn(async move {
            while let Some(pct) = progress_rx.recv().await {
                match progress_inner.store.update_progress(job_id, pct) {
                    Ok(true) => progress_inner.events.emit(JobEvent::Updated {
                        job_id,
                        old_status: JobStatus::Running,
                        new_status: JobStatus::Running,
                        progress: pct.min(100),
                        timestamp: Utc::now(),
                    }),
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
        });

        let finish_inner = self.clone();
        tokio::spawn(async move {
            let outcome = match outcome_rx.await {
                Ok(outcome) => outcome,
                Err(_) => WorkerOutcome::Crashed("worker outcome channel closed".to_string()),
            };
            finish_inner.finish_job(job_id, outcome).await;
        });

        Ok(())
    }

    /// Translate a worker outcome into the job's next state, releasing
    /// the reservation before the new status becomes observable.
    async fn finish_job(self: &Arc<Self>, job_id: JobId, outcome: WorkerOutcome) {
        let Some(mut job) = self.store.get(job_id) else {
            self.allocator.lock().await.release(job_id);
            self.wakeup.notify_one();
            return;
        };
        if job.status != JobStatus::Running {
            self.allocator.lock().await.release(job_id);
            self.wakeup.notify_one();
            return;
        }

        let transition = self.decide_transition(&job, outcome);
        self.allocator.lock().await.release(job_id);

        let old_status = job.status;
        match transition {
            Transition::Complete(value) => {
                job.mark_completed(value);
                let duration_ms = job.duration_ms();
                if self.store.update(job).is_ok() {
                    self.events.emit(JobEvent::Completed {
                        job_id,
                        old_status,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                info!(job_id = %job_id, "job completed");
            }
            Transition::Cancel => {
                job.mark_cancelled();
                if self.store.update(job).is_ok() {
                    self.events.emit(JobEvent::Cancelled {
                        job_id,
                        old_status,
                        timestamp: Utc::now(),
                    });
                }
                info!(job_id = %job_id, "job cancelled");
            }
            Transition::Fail(failure) => {
                warn!(job_id = %job_id, error = %failure, "job failed");
                job.mark_failed(failure.clone());
                if self.store.update(job).is_ok() {
                    self.events.emit(JobEvent::Failed {
                        job_id,
                        old_status,
                        error: failure,
                        timestamp: Utc::now(),
                    });
                }
            }
            Transition::Retry { failure, delay } => {
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                warn!(
                    job_id = %job_id,
                    retry_count = job.retry_count + 1,
                    max_retries = job.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "retrying job"
                );
                job.mark_retrying(failure, retry_at);
                if self.store.update(job.clone()).is_ok() {
                    self.queue.lock().await.enqueue(&job);
                    self.metrics.record_retry();
                    self.events.emit(JobEvent::Updated {
                        job_id,
                        old_status,
                        new_status: JobStatus::Pending,
                        progress: job.progress,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        self.wakeup.notify_one();
    }

    fn decide_transition(&self, job: &Job, outcome: WorkerOutcome) -> Transition {
        match outcome {
            WorkerOutcome::Completed(value) => Transition::Complete(value),
            WorkerOutcome::Cancelled => Transition::Cancel,
            WorkerOutcome::TimedOut => {
                if job.cancel_requested {
                    return Transition::Cancel;
                }
                let timeout_ms = job
                    .options
                    .resolved_timeout_ms(self.config.default_job_timeout_ms);
                let failure = JobFailure::timed_out(timeout_ms);
                if self.config.retry.retries_on_timeout(job.job_type) && job.can_retry() {
                    if let Some(delay) = self.retry_policy.delay_for(job.retry_count) {
                        return Transition::Retry { failure, delay };
                    }
                }
                Transition::Fail(failure)
            }
            WorkerOutcome::Failed(pipeline_failure) => {
                if job.cancel_requested {
                    return Transition::Cancel;
                }
                let failure: JobFailure = pipeline_failure.into();
                if failure.recoverable && job.can_retry() {
                    if let Some(delay) = self.retry_policy.delay_for(job.retry_count) {
                        return Transition::Retry { failure, delay };
                    }
                }
                Transition::Fail(failure)
            }
            WorkerOutcome::Crashed(message) => {
                if job.cancel_requested {
                    return Transition::Cancel;
                }
                Transition::Fail(JobFailure::crashed(message))
            }
        }
    }

    /// Cancel a job that is (still) pending. Pending jobs hold no
    /// reservation, so only the store and observers need updating.
    fn cancel_pending(&self, job_id: JobId) -> Result<bool> {
        let Some(mut job) = self.store.get(job_id) else {
            return Err(Error::NotFound(job_id));
        };
        if job.is_terminal() {
            return Ok(false);
        }
        let old_status = job.status;
        job.mark_cancelled();
        self.store.update(job)?;
        self.events.emit(JobEvent::Cancelled {
            job_id,
            old_status,
            timestamp: Utc::now(),
        });
        info!(job_id = %job_id, "job cancelled");
        Ok(true)
    }

    /// Request cooperative cancellation of a running job.
    fn request_running_cancel(&self, job_id: JobId) -> Result<bool> {
        let Some(job) = self.store.get(job_id) else {
            return Err(Error::NotFound(job_id));
        };
        if job.is_terminal() {
            return Ok(false);
        }
        if !job.cancel_requested {
            self.store.set_cancel_requested(job_id)?;
        }
        self.pool.cancel(job_id);
        debug!(job_id = %job_id, "cancel requested for running job");
        Ok(true)
    }

    /// Best-effort failure marking for a job the dispatcher could not
    /// hand off; invariant violations take one job down, not the loop.
    fn fail_job_internal(&self, job_id: JobId, error: &Error) {
        let Some(mut job) = self.store.get(job_id) else {
            return;
        };
        if job.is_terminal() {
            return;
        }
        let old_status = job.status;
        let failure = JobFailure::internal(error.to_string());
        job.mark_failed(failure.clone());
        if self.store.update(job).is_ok() {
            self.events.emit(JobEvent::Failed {
                job_id,
                old_status,
                error: failure,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobType, ResourceRequirements};
    use crate::pool::{PipelineFailure, ProgressSender};
    use async_trait::async_trait;

    struct NoopPipeline;

    #[async_trait]
    impl ConversionPipeline for NoopPipeline {
        async fn run(
            &self,
            _job: Job,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> std::result::Result<serde_json::Value, PipelineFailure> {
            Ok(serde_json::json!({}))
        }
    }

    fn service() -> JobQueueService {
        JobQueueService::new(ServiceConfig::development(), Arc::new(NoopPipeline))
    }

    #[tokio::test]
    async fn test_enqueue_validates_options() {
        let service = service();

        let bad_timeout = NewJob::new(JobType::Conversion, serde_json::json!({}))
            .with_timeout_ms(0);
        assert!(matches!(
            service.enqueue(bad_timeout).await,
            Err(Error::InvalidOptions(_))
        ));

        let bad_resources = NewJob::new(JobType::Conversion, serde_json::json!({}))
            .with_resources(ResourceRequirements::new(0, 0, 0));
        assert!(matches!(
            service.enqueue(bad_resources).await,
            Err(Error::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_is_immediately_observable() {
        let service = service();
        let payload = serde_json::json!({"mod": "cogwheels.jar"});
        let job_id = service
            .enqueue(NewJob::new(JobType::Conversion, payload.clone()))
            .await
            .unwrap();

        let job = service.status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.payload, payload);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let service = service();
        assert!(matches!(
            service.cancel(uuid::Uuid::now_v7()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_without_dispatch() {
        // The service is never started, so the job stays pending.
        let service = service();
        let job_id = service
            .enqueue(NewJob::new(JobType::Conversion, serde_json::json!({})))
            .await
            .unwrap();

        assert!(service.cancel(job_id).await.unwrap());
        assert_eq!(
            service.status(job_id).unwrap().status,
            JobStatus::Cancelled
        );

        // Terminal: a second cancel reports false.
        assert!(!service.cancel(job_id).await.unwrap());

        let statuses: Vec<JobStatus> = service
            .history(Some(job_id), None)
            .iter()
            .map(|row| row.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Cancelled]);
    }

    #[tokio::test]
    async fn test_backlog_capacity() {
        let mut config = ServiceConfig::development();
        config.backlog_limit = 2;
        let service = JobQueueService::new(config, Arc::new(NoopPipeline));

        for _ in 0..2 {
            service
                .enqueue(NewJob::new(JobType::Conversion, serde_json::json!({})))
                .await
                .unwrap();
        }
        assert!(matches!(
            service
                .enqueue(NewJob::new(JobType::Conversion, serde_json::json!({})))
                .await,
            Err(Error::Capacity(2))
        ));
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let service = service();
        service
            .enqueue(
                NewJob::new(JobType::Conversion, serde_json::json!({}))
                    .with_priority(JobPriority::High),
            )
            .await
            .unwrap();

        let stats = service.stats().await;
        assert_eq!(stats.jobs.pending, 1);
        assert_eq!(stats.queue_depth_by_priority.get(&JobPriority::High), Some(&1));
        assert!(stats.ledger.is_idle());
        assert!(!stats.paused);
    }

    #[tokio::test]
    async fn test_pause_flag() {
        let service = service();
        assert!(!service.is_paused());
        service.pause();
        assert!(service.is_paused());
        service.resume();
        assert!(!service.is_paused());
    }
}
