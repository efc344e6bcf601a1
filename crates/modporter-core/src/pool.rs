//! Worker pool
//!
//! Owns the executor slots and the only long-running operation in the
//! core: invoking the external conversion pipeline. Each attempt runs on
//! its own task with a deadline and a cooperative cancellation token; a
//! worker that ignores the signal past the poison grace window is aborted
//! and its slot recycled.

use crate::error::{Error, Result};
use crate::job::{Job, JobFailure, JobId};
use crate::metrics::{MetricsSummary, ServiceMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Channel the pipeline reports progress (0-100) through
pub type ProgressSender = mpsc::UnboundedSender<u8>;

/// Failure reported by the external conversion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    /// Machine-readable failure kind
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Whether a retry could succeed
    pub recoverable: bool,
}

impl PipelineFailure {
    /// Create a failure
    pub fn new(kind: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            recoverable,
        }
    }

    /// A transient failure worth retrying
    pub fn recoverable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, message, true)
    }

    /// A permanent failure
    pub fn terminal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, message, false)
    }
}

impl From<PipelineFailure> for JobFailure {
    fn from(failure: PipelineFailure) -> Self {
        JobFailure::new(failure.kind, failure.message, failure.recoverable)
    }
}

/// The external conversion pipeline, as consumed by the core.
///
/// Implementations should poll `cancel` and stop promptly when it fires;
/// uncooperative runs are aborted after the poison grace window.
#[async_trait]
pub trait ConversionPipeline: Send + Sync {
    /// Execute one job attempt.
    async fn run(
        &self,
        job: Job,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> std::result::Result<serde_json::Value, PipelineFailure>;
}

/// Executor slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Ready for work
    Idle,

    /// Executing a job
    Busy,

    /// Finishing up; accepts no new work
    Draining,
}

/// Snapshot of one executor slot
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    /// Slot id
    pub id: Uuid,

    /// Current state
    pub state: WorkerState,

    /// Job the slot is executing, if busy
    pub current_job_id: Option<JobId>,

    /// When the current job started
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct WorkerSlot {
    id: Uuid,
    state: WorkerState,
    current_job_id: Option<JobId>,
    started_at: Option<DateTime<Utc>>,
}

impl WorkerSlot {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: WorkerState::Idle,
            current_job_id: None,
            started_at: None,
        }
    }
}

/// Outcome of one job attempt as reported by the pool.
///
/// Only `Cancelled` and `Crashed` originate in the pool itself; the rest
/// pass through from the pipeline or its deadline.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The pipeline finished successfully
    Completed(serde_json::Value),

    /// The deadline expired
    TimedOut,

    /// The attempt was cancel-signalled and stopped
    Cancelled,

    /// The pipeline reported a failure
    Failed(PipelineFailure),

    /// The executor panicked or had to be abandoned
    Crashed(String),
}

struct RunningJob {
    slot_id: Uuid,
    cancel: CancellationToken,
}

struct PoolInner {
    pipeline: Arc<dyn ConversionPipeline>,
    slots: Mutex<Vec<WorkerSlot>>,
    running: DashMap<JobId, RunningJob>,
    poison_grace: Duration,
    draining: AtomicBool,
    metrics: Arc<ServiceMetrics>,
}

impl PoolInner {
    fn release_slot(&self, slot_id: Uuid, poisoned: bool) {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        let Some(pos) = slots.iter().position(|s| s.id == slot_id) else {
            return;
        };
        if poisoned {
            warn!(slot_id = %slot_id, "recycling poisoned worker slot");
            slots[pos] = WorkerSlot::fresh();
        } else {
            slots[pos].current_job_id = None;
            slots[pos].started_at = None;
            slots[pos].state = WorkerState::Idle;
        }
        if self.draining.load(Ordering::SeqCst) {
            slots[pos].state = WorkerState::Draining;
        }
    }
}

/// Concurrency-bounded executor pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with `size` executor slots
    pub fn new(
        pipeline: Arc<dyn ConversionPipeline>,
        size: usize,
        poison_grace: Duration,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let slots = (0..size.max(1)).map(|_| WorkerSlot::fresh()).collect();
        Self {
            inner: Arc::new(PoolInner {
                pipeline,
                slots: Mutex::new(slots),
                running: DashMap::new(),
                poison_grace,
                draining: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// Number of executor slots
    pub fn size(&self) -> usize {
        self.inner.slots.lock().expect("pool lock poisoned").len()
    }

    /// Slots ready for work
    pub fn idle_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .filter(|s| s.state == WorkerState::Idle)
            .count()
    }

    /// Slots executing a job
    pub fn busy_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .filter(|s| s.state == WorkerState::Busy)
            .count()
    }

    /// Snapshot of every slot
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.inner
            .slots
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .map(|s| WorkerInfo {
                id: s.id,
                state: s.state,
                current_job_id: s.current_job_id,
                started_at: s.started_at,
            })
            .collect()
    }

    /// Hand a job to an idle worker.
    ///
    /// The caller is expected to admit work only when a slot exists, so
    /// running out of slots here is an invariant violation surfaced as
    /// `Internal`. The returned channel yields the attempt's outcome.
    pub fn submit(
        &self,
        job: Job,
        timeout: Duration,
        progress: ProgressSender,
    ) -> Result<oneshot::Receiver<WorkerOutcome>> {
        let job_id = job.id;
        let slot_id = {
            let mut slots = self.inner.slots.lock().expect("pool lock poisoned");
            let Some(slot) = slots.iter_mut().find(|s| s.state == WorkerState::Idle) else {
                return Err(Error::Internal(format!(
                    "no idle worker slot for job {}",
                    job_id
                )));
            };
            slot.state = WorkerState::Busy;
            slot.current_job_id = Some(job_id);
            slot.started_at = Some(Utc::now());
            slot.id
        };

        debug!(job_id = %job_id, slot_id = %slot_id, "worker accepted job");

        let cancel = CancellationToken::new();
        self.inner.running.insert(
            job_id,
            RunningJob {
                slot_id,
                cancel: cancel.clone(),
            },
        );

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let (outcome, poisoned) = execute_attempt(&inner, job, timeout, progress, cancel).await;

            match &outcome {
                WorkerOutcome::Completed(_) => inner
                    .metrics
                    .record_completed(started.elapsed().as_millis() as u64),
                WorkerOutcome::TimedOut => inner.metrics.record_timed_out(),
                WorkerOutcome::Cancelled => inner.metrics.record_cancelled(),
                WorkerOutcome::Failed(_) | WorkerOutcome::Crashed(_) => {
                    inner.metrics.record_failed()
                }
            }

            inner.running.remove(&job_id);
            inner.release_slot(slot_id, poisoned);
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }

    /// Signal cancellation to a running job.
    ///
    /// Returns `false` when the job is not currently executing.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.inner.running.get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal cancellation to every running job
    pub fn cancel_all(&self) {
        for entry in self.inner.running.iter() {
            entry.value().cancel.cancel();
        }
    }

    /// Wait until no slot is busy, admitting no new work meanwhile.
    pub async fn drain(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        {
            let mut slots = self.inner.slots.lock().expect("pool lock poisoned");
            for slot in slots.iter_mut() {
                if slot.state == WorkerState::Idle {
                    slot.state = WorkerState::Draining;
                }
            }
        }
        while self.busy_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Execution metrics snapshot
    pub fn metrics(&self) -> MetricsSummary {
        self.inner.metrics.summary()
    }
}

async fn execute_attempt(
    inner: &Arc<PoolInner>,
    job: Job,
    timeout: Duration,
    progress: ProgressSender,
    cancel: CancellationToken,
) -> (WorkerOutcome, bool) {
    let pipeline = inner.pipeline.clone();
    let child = cancel.child_token();
    let mut attempt = tokio::spawn(async move { pipeline.run(job, progress, child).await });

    let grace = inner.poison_grace;
    tokio::select! {
        joined = &mut attempt => (outcome_from_join(joined), false),
        _ = tokio::time::sleep(timeout) => {
            // Deadline hit: signal the pipeline, give it the grace window
            // to yield, then abandon the executor.
            cancel.cancel();
            match tokio::time::timeout(grace, &mut attempt).await {
                Ok(_) => (WorkerOutcome::TimedOut, false),
                Err(_) => {
                    attempt.abort();
                    (WorkerOutcome::TimedOut, true)
                }
            }
        }
        _ = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut attempt).await {
                // A pipeline that finishes its work despite the signal
                // still counts as completed.
                Ok(Ok(Ok(value))) => (WorkerOutcome::Completed(value), false),
                Ok(_) => (WorkerOutcome::Cancelled, false),
                Err(_) => {
                    attempt.abort();
                    (WorkerOutcome::Cancelled, true)
                }
            }
        }
    }
}

fn outcome_from_join(
    joined: std::result::Result<std::result::Result<serde_json::Value, PipelineFailure>, JoinError>,
) -> WorkerOutcome {
    match joined {
        Ok(Ok(value)) => WorkerOutcome::Completed(value),
        Ok(Err(failure)) => WorkerOutcome::Failed(failure),
        Err(e) if e.is_panic() => WorkerOutcome::Crashed("conversion pipeline panicked".into()),
        Err(_) => WorkerOutcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobType, NewJob};

    fn sample_job() -> Job {
        Job::new(NewJob::new(JobType::Conversion, serde_json::json!({"mod": "demo"})))
    }

    fn pool_with(pipeline: Arc<dyn ConversionPipeline>, size: usize) -> WorkerPool {
        WorkerPool::new(
            pipeline,
            size,
            Duration::from_millis(100),
            Arc::new(ServiceMetrics::new()),
        )
    }

    struct EchoPipeline;

    #[async_trait]
    impl ConversionPipeline for EchoPipeline {
        async fn run(
            &self,
            job: Job,
            progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> std::result::Result<serde_json::Value, PipelineFailure> {
            let _ = progress.send(50);
            let _ = progress.send(100);
            Ok(serde_json::json!({ "echo": job.payload }))
        }
    }

    struct SleepyPipeline {
        duration: Duration,
    }

    #[async_trait]
    impl ConversionPipeline for SleepyPipeline {
        async fn run(
            &self,
            _job: Job,
            _progress: ProgressSender,
            cancel: CancellationToken,
        ) -> std::result::Result<serde_json::Value, PipelineFailure> {
            tokio::select! {
                _ = tokio::time::sleep(self.duration) => Ok(serde_json::json!({"slept": true})),
                _ = cancel.cancelled() => Err(PipelineFailure::terminal("cancelled", "stopped on signal")),
            }
        }
    }

    /// Ignores its cancellation token entirely.
    struct StubbornPipeline;

    #[async_trait]
    impl ConversionPipeline for StubbornPipeline {
        async fn run(
            &self,
            _job: Job,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> std::result::Result<serde_json::Value, PipelineFailure> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct PanickyPipeline;

    #[async_trait]
    impl ConversionPipeline for PanickyPipeline {
        async fn run(
            &self,
            _job: Job,
            _progress: ProgressSender,
            _cancel: CancellationToken,
        ) -> std::result::Result<serde_json::Value, PipelineFailure> {
            panic!("corrupted mod archive");
        }
    }

    #[tokio::test]
    async fn test_successful_attempt() {
        let pool = pool_with(Arc::new(EchoPipeline), 2);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let rx = pool
            .submit(sample_job(), Duration::from_secs(5), progress_tx)
            .unwrap();

        match rx.await.unwrap() {
            WorkerOutcome::Completed(value) => {
                assert_eq!(value["echo"]["mod"], "demo");
            }
            other => panic!("expected completion, got {:?}", other),
        }

        assert_eq!(progress_rx.recv().await, Some(50));
        assert_eq!(progress_rx.recv().await, Some(100));

        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.metrics().completed, 1);
    }

    #[tokio::test]
    async fn test_no_idle_slot_is_an_error() {
        let pool = pool_with(
            Arc::new(SleepyPipeline {
                duration: Duration::from_secs(60),
            }),
            1,
        );
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let _running = pool
            .submit(sample_job(), Duration::from_secs(60), tx1)
            .unwrap();
        let err = pool
            .submit(sample_job(), Duration::from_secs(60), tx2)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        pool.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let pool = pool_with(
            Arc::new(SleepyPipeline {
                duration: Duration::from_secs(300),
            }),
            1,
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let rx = pool
            .submit(sample_job(), Duration::from_secs(1), tx)
            .unwrap();

        match rx.await.unwrap() {
            WorkerOutcome::TimedOut => {}
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(pool.metrics().timed_out, 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_cooperative_cancellation() {
        let pool = pool_with(
            Arc::new(SleepyPipeline {
                duration: Duration::from_secs(300),
            }),
            1,
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let job = sample_job();
        let job_id = job.id;
        let rx = pool.submit(job, Duration::from_secs(600), tx).unwrap();

        // Let the attempt start before signalling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.cancel(job_id));

        match rx.await.unwrap() {
            WorkerOutcome::Cancelled => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(!pool.cancel(job_id));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncooperative_worker_is_poisoned_and_recycled() {
        let pool = pool_with(Arc::new(StubbornPipeline), 1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let before: Vec<Uuid> = pool.workers().iter().map(|w| w.id).collect();
        let rx = pool
            .submit(sample_job(), Duration::from_secs(1), tx)
            .unwrap();

        match rx.await.unwrap() {
            WorkerOutcome::TimedOut => {}
            other => panic!("expected timeout, got {:?}", other),
        }

        // The slot was replaced, and the pool is back to full strength.
        let after: Vec<Uuid> = pool.workers().iter().map(|w| w.id).collect();
        assert_ne!(before, after);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_pipeline_reports_crash() {
        let pool = pool_with(Arc::new(PanickyPipeline), 1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let rx = pool
            .submit(sample_job(), Duration::from_secs(5), tx)
            .unwrap();

        match rx.await.unwrap() {
            WorkerOutcome::Crashed(message) => assert!(message.contains("panicked")),
            other => panic!("expected crash, got {:?}", other),
        }
        assert_eq!(pool.metrics().failed, 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_busy_slots() {
        let pool = pool_with(
            Arc::new(SleepyPipeline {
                duration: Duration::from_millis(50),
            }),
            2,
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let _outcome = pool
            .submit(sample_job(), Duration::from_secs(5), tx)
            .unwrap();

        pool.drain().await;
        assert_eq!(pool.busy_count(), 0);

        // Drained slots accept no new work.
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(pool
            .submit(sample_job(), Duration::from_secs(5), tx2)
            .is_err());
    }
}
