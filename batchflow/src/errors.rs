//! Error types for the batchflow engine.
//!
//! Item-level failures (`ItemError`) are raised by readers, processors and
//! writers and are resolved inside the chunk by the retry and skip policies.
//! Everything that escapes a chunk is a `BatchError`.

use crate::core::BatchStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Classification of an item-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// Transient I/O failure. Retryable by default.
    TransientIo,
    /// Data validation failure. Skippable by default, never worth retrying.
    Validation,
    /// Broken configuration. Never retried or skipped, aborts the job.
    FatalConfiguration,
    /// A resource could not be acquired. Aborts the step without consuming
    /// retry or skip budget.
    ResourceAcquisition,
    /// Application-specific kind, classified only by configured classifiers.
    Other(String),
}

impl ItemErrorKind {
    /// Returns true if this kind is resolved without consulting any policy.
    #[must_use]
    pub fn bypasses_policies(&self) -> bool {
        matches!(self, Self::FatalConfiguration | Self::ResourceAcquisition)
    }
}

impl fmt::Display for ItemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientIo => write!(f, "transient_io"),
            Self::Validation => write!(f, "validation"),
            Self::FatalConfiguration => write!(f, "fatal_configuration"),
            Self::ResourceAcquisition => write!(f, "resource_acquisition"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A failure raised while reading, processing or writing an item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ItemError {
    /// The error classification.
    pub kind: ItemErrorKind,
    /// Human readable message.
    pub message: String,
}

impl ItemError {
    /// Creates a new item error.
    #[must_use]
    pub fn new(kind: ItemErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient I/O error.
    #[must_use]
    pub fn transient_io(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::TransientIo, message)
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::Validation, message)
    }

    /// Creates a fatal configuration error.
    #[must_use]
    pub fn fatal_configuration(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::FatalConfiguration, message)
    }

    /// Creates a resource acquisition error.
    #[must_use]
    pub fn resource_acquisition(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::ResourceAcquisition, message)
    }

    /// Creates an error with an application-specific kind.
    #[must_use]
    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::Other(kind.into()), message)
    }
}

/// The phase of the chunk cycle an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPhase {
    /// Pulling items from the reader.
    Read,
    /// Transforming items.
    Process,
    /// Handing the batch to the writer.
    Write,
}

impl fmt::Display for ChunkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Process => write!(f, "process"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Raised when a skippable failure would push a step past its skip limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Skip limit of {limit} exceeded: {source}")]
pub struct SkipLimitExceededError {
    /// The configured limit.
    pub limit: u64,
    /// The failure that could not be skipped.
    pub source: ItemError,
}

impl SkipLimitExceededError {
    /// Creates a new skip limit error.
    #[must_use]
    pub fn new(limit: u64, source: ItemError) -> Self {
        Self { limit, source }
    }
}

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchError {
    /// An item failure that no policy could resolve.
    #[error("Item failure in {phase} phase: {source}")]
    Item {
        /// Phase the failure was raised in.
        phase: ChunkPhase,
        /// The item failure.
        source: ItemError,
    },

    /// Retries ran out for an item failure that could not be skipped.
    #[error("Retry exhausted after {attempts} attempts in {phase} phase: {source}")]
    RetryExhausted {
        /// Phase the failure was raised in.
        phase: ChunkPhase,
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        source: ItemError,
    },

    /// A skip would have exceeded the configured limit.
    #[error("{0}")]
    SkipLimitExceeded(#[from] SkipLimitExceededError),

    /// A step resource could not be acquired.
    #[error("Resource acquisition failed for step '{step}': {source}")]
    ResourceAcquisition {
        /// The step name.
        step: String,
        /// The underlying failure.
        source: ItemError,
    },

    /// A fatal configuration error. Aborts the whole job.
    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(ItemError),

    /// A reader or writer failed to save its position.
    #[error("Failed to update stream state for step '{step}': {source}")]
    StreamUpdate {
        /// The step name.
        step: String,
        /// The underlying failure.
        source: ItemError,
    },

    /// Job repository failure.
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Transaction failure.
    #[error("{0}")]
    Transaction(#[from] TransactionError),

    /// Job or step definition is invalid.
    #[error("{0}")]
    Validation(#[from] JobValidationError),

    /// A launch or restart was refused.
    #[error("{0}")]
    Restart(#[from] JobRestartError),

    /// Job parameters were rejected.
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    /// A status transition that the state machine does not allow.
    #[error("Illegal status transition for '{name}': {from} -> {to}")]
    IllegalTransition {
        /// Step or job name.
        name: String,
        /// Current status.
        from: BatchStatus,
        /// Requested status.
        to: BatchStatus,
    },

    /// A worker was interrupted before the step finished.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Returns true if this error must abort the whole job.
    #[must_use]
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(self, Self::FatalConfiguration(_))
    }

    /// Returns a short type name used in failure records.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Item { .. } => "ItemError",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::SkipLimitExceeded(_) => "SkipLimitExceeded",
            Self::ResourceAcquisition { .. } => "ResourceAcquisition",
            Self::FatalConfiguration(_) => "FatalConfiguration",
            Self::StreamUpdate { .. } => "StreamUpdate",
            Self::Repository(_) => "RepositoryError",
            Self::Transaction(_) => "TransactionError",
            Self::Validation(_) => "JobValidationError",
            Self::Restart(_) => "JobRestartError",
            Self::InvalidParameters(_) => "InvalidParameters",
            Self::IllegalTransition { .. } => "IllegalTransition",
            Self::Interrupted(_) => "Interrupted",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// Errors raised by a job repository.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A running execution already exists for the instance.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The stored form could not be produced or read back.
    #[error("Repository serialization error: {0}")]
    Serialization(String),

    /// Backend failure.
    #[error("Repository backend error: {0}")]
    Backend(String),
}

/// Errors raised by a transaction manager.
#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    /// A transaction could not be started.
    #[error("Failed to begin transaction: {0}")]
    Begin(String),

    /// Commit failed. The transaction is considered rolled back.
    #[error("Failed to commit transaction {id}: {reason}")]
    Commit {
        /// Transaction id.
        id: u64,
        /// Failure reason.
        reason: String,
    },

    /// Rollback failed.
    #[error("Failed to roll back transaction {id}: {reason}")]
    Rollback {
        /// Transaction id.
        id: u64,
        /// Failure reason.
        reason: String,
    },

    /// The transaction is not active.
    #[error("Transaction {0} is not active")]
    NotActive(u64),
}

/// Reasons a job launch or restart is refused.
#[derive(Debug, Clone, Error)]
pub enum JobRestartError {
    /// Another execution of the instance is running.
    #[error("A job execution for job '{job}' is already running: {execution_id}")]
    AlreadyRunning {
        /// Job name.
        job: String,
        /// Running execution id.
        execution_id: String,
    },

    /// The instance already completed (or was abandoned).
    #[error("Job instance already complete for job '{job}' (last status: {status})")]
    AlreadyComplete {
        /// Job name.
        job: String,
        /// Status of the last execution.
        status: BatchStatus,
    },

    /// The job is not restartable.
    #[error("Job '{job}' is not restartable")]
    NotRestartable {
        /// Job name.
        job: String,
    },

    /// The last execution ended in a status that cannot be restarted.
    #[error("Job '{job}' cannot be restarted from status {status}")]
    IllegalStatus {
        /// Job name.
        job: String,
        /// Last status.
        status: BatchStatus,
    },

    /// A step was started more often than its start limit allows.
    #[error("Step '{step}' exceeded its start limit of {limit}")]
    StartLimitExceeded {
        /// Step name.
        step: String,
        /// The configured limit.
        limit: u32,
    },

    /// The execution is not running and cannot be stopped.
    #[error("Job execution {0} is not running")]
    NotRunning(String),
}

/// Metadata about a definition error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "JOB-002-DUPLICATE_STEP").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a job or step definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl JobValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}
