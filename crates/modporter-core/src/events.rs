//! Job lifecycle events
//!
//! Events flow through one bounded broadcast channel. Subscribers that
//! fall behind lag (dropping their oldest buffered events) instead of
//! blocking the dispatcher.

use crate::job::{JobFailure, JobId, JobPriority, JobStatus, JobType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// A fact about a job's lifecycle.
///
/// Every status transition produces exactly one event, emitted after the
/// store write and any resource release. Ordering is guaranteed per job
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job was accepted into the backlog
    Created {
        job_id: JobId,
        job_type: JobType,
        priority: JobPriority,
        timestamp: DateTime<Utc>,
    },

    /// A non-terminal change: dispatch, progress, or retry re-entry
    Updated {
        job_id: JobId,
        old_status: JobStatus,
        new_status: JobStatus,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// The job finished successfully
    Completed {
        job_id: JobId,
        old_status: JobStatus,
        duration_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// The job failed permanently
    Failed {
        job_id: JobId,
        old_status: JobStatus,
        error: JobFailure,
        timestamp: DateTime<Utc>,
    },

    /// The job was cancelled
    Cancelled {
        job_id: JobId,
        old_status: JobStatus,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Created { .. } => "job:created",
            JobEvent::Updated { .. } => "job:updated",
            JobEvent::Completed { .. } => "job:completed",
            JobEvent::Failed { .. } => "job:failed",
            JobEvent::Cancelled { .. } => "job:cancelled",
        }
    }

    /// Job the event refers to
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Created { job_id, .. }
            | JobEvent::Updated { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id, .. } => *job_id,
        }
    }

    /// When the transition happened
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Created { timestamp, .. }
            | JobEvent::Updated { timestamp, .. }
            | JobEvent::Completed { timestamp, .. }
            | JobEvent::Failed { timestamp, .. }
            | JobEvent::Cancelled { timestamp, .. } => *timestamp,
        }
    }

    /// Status the job transitioned to
    pub fn new_status(&self) -> JobStatus {
        match self {
            JobEvent::Created { .. } => JobStatus::Pending,
            JobEvent::Updated { new_status, .. } => *new_status,
            JobEvent::Completed { .. } => JobStatus::Completed,
            JobEvent::Failed { .. } => JobStatus::Failed,
            JobEvent::Cancelled { .. } => JobStatus::Cancelled,
        }
    }
}

/// In-process publish channel for job events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Publish an event.
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: JobEvent) {
        trace!(event = event.name(), job_id = %event.job_id(), "emitting event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
