//! Job types and definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
///
/// Generated as a UUIDv7 so ids sort by creation time.
pub type JobId = Uuid;

/// Kind of work a job carries.
///
/// Opaque to the orchestration core except as a payload tag; the pipeline
/// decides what each type means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full mod conversion
    Conversion,

    /// Input validation pass
    Validation,

    /// Mod analysis / feature report
    Analysis,

    /// Addon packaging
    Packaging,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Conversion => write!(f, "conversion"),
            JobType::Validation => write!(f, "validation"),
            JobType::Analysis => write!(f, "analysis"),
            JobType::Packaging => write!(f, "packaging"),
        }
    }
}

/// Job priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Background work, processed last
    Low,

    /// Default priority
    Normal,

    /// Processed before normal traffic
    High,

    /// Jumps the queue
    Urgent,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Urgent => write!(f, "urgent"),
        }
    }
}

impl JobPriority {
    /// Convert to integer weight
    pub fn weight(&self) -> u8 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Normal => 2,
            JobPriority::High => 3,
            JobPriority::Urgent => 4,
        }
    }

    /// Highest weight any priority maps to
    pub fn max_weight() -> u8 {
        JobPriority::Urgent.weight()
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dispatch
    Pending,

    /// Handed to a worker
    Running,

    /// Finished successfully (terminal)
    Completed,

    /// Failed permanently (terminal)
    Failed,

    /// Cancelled by request (terminal)
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl JobStatus {
    /// Check if the status permits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job counts against the backlog
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Multi-dimensional resource requirements for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Memory in megabytes
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// CPU slots
    #[serde(default = "default_cpu_slots")]
    pub cpu_slots: u32,

    /// Scratch disk in megabytes
    #[serde(default = "default_disk_mb")]
    pub disk_mb: u64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpu_slots: default_cpu_slots(),
            disk_mb: default_disk_mb(),
        }
    }
}

impl ResourceRequirements {
    /// Create requirements with explicit values
    pub fn new(memory_mb: u64, cpu_slots: u32, disk_mb: u64) -> Self {
        Self {
            memory_mb,
            cpu_slots,
            disk_mb,
        }
    }

    /// True when every dimension is zero
    pub fn is_empty(&self) -> bool {
        self.memory_mb == 0 && self.cpu_slots == 0 && self.disk_mb == 0
    }
}

/// Per-job execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Execution deadline in milliseconds; `None` uses the service default
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Max retry attempts for recoverable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Resource requirements used for admission
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_retries: default_max_retries(),
            resources: ResourceRequirements::default(),
        }
    }
}

impl JobOptions {
    /// Execution deadline, falling back to the service default
    pub fn resolved_timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout_ms.unwrap_or(default_ms)
    }

    /// Execution deadline as a Duration, falling back to the service default
    pub fn resolved_timeout(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.resolved_timeout_ms(default_ms))
    }
}

/// Failure details recorded on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable failure kind
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Whether a retry could succeed
    pub recoverable: bool,
}

impl JobFailure {
    /// Create a failure record
    pub fn new(kind: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            recoverable,
        }
    }

    /// Deadline expiry failure
    pub fn timed_out(timeout_ms: u64) -> Self {
        Self::new(
            "timed_out",
            format!("job exceeded its {}ms deadline", timeout_ms),
            false,
        )
    }

    /// Cooperative cancellation marker
    pub fn cancelled() -> Self {
        Self::new("cancelled", "job was cancelled", false)
    }

    /// Worker crash (panic or aborted executor)
    pub fn crashed(message: impl Into<String>) -> Self {
        Self::new("worker_crashed", message, false)
    }

    /// Internal invariant violation
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", message, false)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Input for enqueueing a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Kind of work
    pub job_type: JobType,

    /// Priority (defaults to normal)
    #[serde(default)]
    pub priority: JobPriority,

    /// Opaque payload forwarded to the pipeline
    pub payload: serde_json::Value,

    /// Execution options
    #[serde(default)]
    pub options: JobOptions,
}

impl NewJob {
    /// Create an enqueue request with default priority and options
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            priority: JobPriority::default(),
            payload,
            options: JobOptions::default(),
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set all options at once
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the execution deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    /// Set the resource requirements
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.options.resources = resources;
        self
    }
}

/// The durable unit of work tracked by the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique, creation-ordered id
    pub id: JobId,

    /// Kind of work
    pub job_type: JobType,

    /// Priority used for queue ordering
    pub priority: JobPriority,

    /// Opaque payload forwarded to the pipeline
    pub payload: serde_json::Value,

    /// Execution options
    pub options: JobOptions,

    /// Current status
    pub status: JobStatus,

    /// Progress 0-100, reported by the worker
    pub progress: u8,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the current (or last) attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Pipeline result on success
    pub result: Option<serde_json::Value>,

    /// Failure details, also kept across retries
    pub error: Option<JobFailure>,

    /// Set when a cancel was requested while running; the job stays
    /// `running` until the worker reports back.
    pub cancel_requested: bool,

    /// Earliest dispatch time for a retrying job
    pub retry_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job from an enqueue request
    pub fn new(new_job: NewJob) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: new_job.job_type,
            priority: new_job.priority,
            payload: new_job.payload,
            options: new_job.options,
            status: JobStatus::Pending,
            progress: 0,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel_requested: false,
            retry_at: None,
        }
    }

    /// Retry budget from the options
    pub fn max_retries(&self) -> u32 {
        self.options.max_retries
    }

    /// Resource requirements from the options
    pub fn resources(&self) -> &ResourceRequirements {
        &self.options.resources
    }

    /// Check if the retry budget allows another attempt
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.options.max_retries
    }

    /// Check if the job reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration of the last attempt, if finished
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds().max(0) as u64)
            }
            _ => None,
        }
    }

    /// Mark as handed to a worker
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.retry_at = None;
    }

    /// Mark as successfully completed
    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
    }

    /// Mark as permanently failed
    pub fn mark_failed(&mut self, failure: JobFailure) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(failure);
    }

    /// Mark as cancelled
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.error = Some(JobFailure::cancelled());
    }

    /// Put the job back in the pending set for a retry.
    ///
    /// Consumes one retry and records the failure that caused it; the job
    /// must not be dispatched before `retry_at`.
    pub fn mark_retrying(&mut self, failure: JobFailure, retry_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.error = Some(failure);
        self.started_at = None;
        self.progress = 0;
        self.retry_at = Some(retry_at);
    }
}

/// One row of the append-only status history.
///
/// Appended on every status or progress change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    /// Job the row belongs to
    pub job_id: JobId,

    /// Status at the time of the change
    pub status: JobStatus,

    /// Progress at the time of the change
    pub progress: u8,

    /// Failure details, if any
    pub error: Option<JobFailure>,

    /// Result, present once completed
    pub result: Option<serde_json::Value>,

    /// When the change happened
    pub timestamp: DateTime<Utc>,
}

impl JobStatusUpdate {
    /// Snapshot a history row from the job's current state
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            result: job.result.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Filter for listing jobs
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    /// Match a specific status
    pub status: Option<JobStatus>,

    /// Match a specific job type
    pub job_type: Option<JobType>,
}

impl JobFilter {
    /// Create an empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by job type
    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Check whether a job matches
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(job_type) = self.job_type {
            if job.job_type != job_type {
                return false;
            }
        }
        true
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_memory_mb() -> u64 {
    512
}
fn default_cpu_slots() -> u32 {
    1
}
fn default_disk_mb() -> u64 {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weights() {
        assert_eq!(JobPriority::Low.weight(), 1);
        assert_eq!(JobPriority::Normal.weight(), 2);
        assert_eq!(JobPriority::High.weight(), 3);
        assert_eq!(JobPriority::Urgent.weight(), 4);

        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());

        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Completed.is_active());
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new(NewJob::new(
            JobType::Conversion,
            serde_json::json!({"mod": "example.jar"}),
        ));

        assert_eq!(job.job_type, JobType::Conversion);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.retry_count, 0);
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_job_ids_sort_by_creation() {
        let a = Job::new(NewJob::new(JobType::Validation, serde_json::json!({})));
        let b = Job::new(NewJob::new(JobType::Validation, serde_json::json!({})));
        assert!(a.id < b.id);
    }

    #[test]
    fn test_new_job_builders() {
        let new_job = NewJob::new(JobType::Packaging, serde_json::json!({}))
            .with_priority(JobPriority::Urgent)
            .with_timeout_ms(5_000)
            .with_max_retries(5)
            .with_resources(ResourceRequirements::new(1024, 2, 512));

        assert_eq!(new_job.priority, JobPriority::Urgent);
        assert_eq!(new_job.options.timeout_ms, Some(5_000));
        assert_eq!(new_job.options.max_retries, 5);
        assert_eq!(new_job.options.resources.memory_mb, 1024);
    }

    #[test]
    fn test_job_lifecycle_transitions() {
        let mut job = Job::new(NewJob::new(JobType::Conversion, serde_json::json!({})));

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.mark_completed(serde_json::json!({"ok": true}));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert!(job.result.is_some());
    }

    #[test]
    fn test_retry_bookkeeping() {
        let mut job = Job::new(
            NewJob::new(JobType::Conversion, serde_json::json!({})).with_max_retries(1),
        );

        assert!(job.can_retry());
        job.mark_running();
        job.mark_retrying(
            JobFailure::new("pipeline", "transient", true),
            Utc::now(),
        );

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.retry_at.is_some());
        assert!(!job.can_retry());
    }

    #[test]
    fn test_status_update_snapshot() {
        let mut job = Job::new(NewJob::new(JobType::Analysis, serde_json::json!({})));
        job.mark_running();
        job.progress = 40;

        let row = JobStatusUpdate::from_job(&job);
        assert_eq!(row.job_id, job.id);
        assert_eq!(row.status, JobStatus::Running);
        assert_eq!(row.progress, 40);
    }

    #[test]
    fn test_filter_matching() {
        let job = Job::new(NewJob::new(JobType::Conversion, serde_json::json!({})));

        assert!(JobFilter::new().matches(&job));
        assert!(JobFilter::new()
            .with_status(JobStatus::Pending)
            .matches(&job));
        assert!(!JobFilter::new()
            .with_status(JobStatus::Running)
            .matches(&job));
        assert!(!JobFilter::new()
            .with_job_type(JobType::Packaging)
            .matches(&job));
    }
}
