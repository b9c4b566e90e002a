//! Lifecycle events emitted by the orchestrator and the job scheduler.
//!
//! Sinks are injected into the components that emit; there is no
//! process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A stage routine ran and its artifact was bound.
    pub const STAGE_LOCKED: &str = "stage.locked";
    /// A stage was bound to an already stored artifact.
    pub const STAGE_REUSED: &str = "stage.reused";
    /// A stage routine faulted.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was unlocked, directly or by cascade.
    pub const STAGE_UNLOCKED: &str = "stage.unlocked";
    /// A job entered the queue.
    pub const JOB_SUBMITTED: &str = "job.submitted";
    /// A job was admitted and handed to its handler.
    pub const JOB_STARTED: &str = "job.started";
    /// A job attempt failed and was re-queued.
    pub const JOB_RETRYING: &str = "job.retrying";
    /// A job finished successfully.
    pub const JOB_COMPLETED: &str = "job.completed";
    /// A job exhausted its retries.
    pub const JOB_FAILED: &str = "job.failed";
    /// A job was cancelled.
    pub const JOB_CANCELLED: &str = "job.cancelled";
}
