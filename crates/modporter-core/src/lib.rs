//! Conversion job orchestration core
//!
//! This crate is the scheduling heart of the ModPorter conversion
//! service. It accepts opaque conversion requests, persists their status
//! in memory (with an optional write-through hook), admits them against
//! multi-dimensional resource limits, dispatches them to a
//! concurrency-bounded worker pool, and streams lifecycle events to
//! observers. Partial failures stay contained: worker crashes poison only
//! their slot, recoverable pipeline errors retry with exponential
//! backoff, and the dispatch loop survives any per-job error.
//!
//! ## Architecture
//!
//! - [`JobStatusStore`] — current job records plus an append-only,
//!   bounded status history
//! - [`ResourceAllocator`] — all-or-nothing admission against the
//!   memory/CPU/disk ledger
//! - [`PendingQueue`] — priority-ordered pending set with
//!   scan-with-filter selection and starvation promotion
//! - [`WorkerPool`] — executor slots invoking the external
//!   [`ConversionPipeline`], with deadlines, cooperative cancellation,
//!   and slot poisoning
//! - [`JobQueueService`] — the public façade wiring it all together
//!
//! The conversion pipeline itself (parsing, asset translation, logic
//! transpilation) is an external collaborator injected behind the
//! [`ConversionPipeline`] trait.

pub mod allocator;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod service;
pub mod store;

// Re-export main types
pub use allocator::{Admission, ResourceAllocator, ResourceLedger, ResourceShortfall, ResourceTotals};
pub use config::{CleanupConfig, RetryConfig, ServiceConfig};
pub use error::{Error, Result};
pub use events::{EventBus, JobEvent};
pub use job::{
    Job, JobFailure, JobFilter, JobId, JobOptions, JobPriority, JobStatus, JobStatusUpdate,
    JobType, NewJob, ResourceRequirements,
};
pub use metrics::{MetricsSummary, ServiceMetrics};
pub use pool::{
    ConversionPipeline, PipelineFailure, ProgressSender, WorkerInfo, WorkerOutcome, WorkerPool,
    WorkerState,
};
pub use queue::{PendingQueue, QueueEntry};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use service::{JobQueueService, ServiceStats};
pub use store::{JobStatusStore, PersistenceHook, StoreStats};

/// Current version of modporter-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
