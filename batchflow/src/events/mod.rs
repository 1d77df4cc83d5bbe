//! Event emission for observability.
//!
//! Steps and jobs publish lifecycle events through an [`EventSink`]. The
//! event type names are listed in [`types`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// A job execution started.
    pub const JOB_STARTED: &str = "job.started";
    /// A job execution completed.
    pub const JOB_COMPLETED: &str = "job.completed";
    /// A job execution failed.
    pub const JOB_FAILED: &str = "job.failed";
    /// A job execution stopped.
    pub const JOB_STOPPED: &str = "job.stopped";
    /// A step execution started.
    pub const STEP_STARTED: &str = "step.started";
    /// A step was not run because a previous execution completed it.
    pub const STEP_SKIPPED: &str = "step.skipped";
    /// A step execution completed.
    pub const STEP_COMPLETED: &str = "step.completed";
    /// A step execution failed.
    pub const STEP_FAILED: &str = "step.failed";
    /// A step execution stopped.
    pub const STEP_STOPPED: &str = "step.stopped";
    /// A chunk committed.
    pub const CHUNK_COMMITTED: &str = "chunk.committed";
    /// A chunk rolled back.
    pub const CHUNK_ROLLED_BACK: &str = "chunk.rolled_back";
    /// A batch write failed and items are being written one by one.
    pub const CHUNK_SCAN: &str = "chunk.scan";
    /// An item was skipped.
    pub const ITEM_SKIPPED: &str = "item.skipped";
}
