//! Step executions and the counter deltas each chunk contributes.

use crate::context::ExecutionContext;
use crate::core::{BatchStatus, ExitStatus};
use crate::errors::{BatchError, ChunkPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of a failure attached to an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Step the failure happened in, if any.
    pub step: Option<String>,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// Whether the failure aborts the whole job.
    pub fatal: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a failure record from an engine error.
    #[must_use]
    pub fn from_error(step: Option<&str>, error: &BatchError) -> Self {
        Self {
            step: step.map(ToString::to_string),
            error: error.to_string(),
            error_type: error.type_name().to_string(),
            fatal: error.is_fatal_to_job(),
            timestamp: Utc::now(),
        }
    }
}

/// Counter deltas produced by one chunk.
///
/// Applied to the owning [`StepExecution`] only when the chunk commits, so a
/// rolled-back chunk never advances the step's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContribution {
    /// Items read successfully.
    pub read_count: u64,
    /// Items written.
    pub write_count: u64,
    /// Items the processor filtered out.
    pub filter_count: u64,
    /// Reads skipped.
    pub read_skip_count: u64,
    /// Items skipped during processing.
    pub process_skip_count: u64,
    /// Items skipped during writing.
    pub write_skip_count: u64,
}

impl StepContribution {
    /// Records a skip in the given phase.
    pub fn increment_skip(&mut self, phase: ChunkPhase) {
        match phase {
            ChunkPhase::Read => self.read_skip_count += 1,
            ChunkPhase::Process => self.process_skip_count += 1,
            ChunkPhase::Write => self.write_skip_count += 1,
        }
    }

    /// Returns the skip count for one phase.
    #[must_use]
    pub fn skip_count_for(&self, phase: ChunkPhase) -> u64 {
        match phase {
            ChunkPhase::Read => self.read_skip_count,
            ChunkPhase::Process => self.process_skip_count,
            ChunkPhase::Write => self.write_skip_count,
        }
    }

    /// Returns the skip count across all phases.
    #[must_use]
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Returns true if the chunk consumed nothing from the reader.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_count == 0 && self.read_skip_count == 0
    }

    /// Adds another contribution to this one.
    pub fn merge(&mut self, other: &Self) {
        self.read_count += other.read_count;
        self.write_count += other.write_count;
        self.filter_count += other.filter_count;
        self.read_skip_count += other.read_skip_count;
        self.process_skip_count += other.process_skip_count;
        self.write_skip_count += other.write_skip_count;
    }
}

/// One attempt to run a step within a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique id.
    pub id: Uuid,
    /// Owning job execution.
    pub job_execution_id: Uuid,
    /// Step name.
    pub step_name: String,
    status: BatchStatus,
    /// Exit status.
    pub exit_status: ExitStatus,
    /// Items read.
    pub read_count: u64,
    /// Items written.
    pub write_count: u64,
    /// Items filtered by the processor.
    pub filter_count: u64,
    /// Reads skipped.
    pub read_skip_count: u64,
    /// Items skipped during processing.
    pub process_skip_count: u64,
    /// Items skipped during writing.
    pub write_skip_count: u64,
    /// Committed chunks.
    pub commit_count: u64,
    /// Rolled back transactions.
    pub rollback_count: u64,
    /// When the step started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the step finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Last persisted update.
    pub last_updated: Option<DateTime<Utc>>,
    /// Progress snapshot.
    pub execution_context: ExecutionContext,
    /// Failures recorded while running.
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    #[serde(default)]
    terminate_only: bool,
}

impl StepExecution {
    /// Creates a new step execution in `STARTING`.
    #[must_use]
    pub fn new(step_name: impl Into<String>, job_execution_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
            terminate_only: false,
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Moves to a new status.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::IllegalTransition` if the state machine does not
    /// allow the move.
    pub fn transition_to(&mut self, next: BatchStatus) -> Result<(), BatchError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(BatchError::IllegalTransition {
                name: self.step_name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Returns the skip count across all phases.
    #[must_use]
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Returns the committed skip count for one phase.
    #[must_use]
    pub fn skip_count_for(&self, phase: ChunkPhase) -> u64 {
        match phase {
            ChunkPhase::Read => self.read_skip_count,
            ChunkPhase::Process => self.process_skip_count,
            ChunkPhase::Write => self.write_skip_count,
        }
    }

    /// Applies a committed chunk's counters.
    pub fn apply_contribution(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
    }

    /// Records a failure.
    pub fn add_failure(&mut self, error: &BatchError) {
        self.failures
            .push(FailureRecord::from_error(Some(&self.step_name), error));
    }

    /// Returns true if a recorded failure must abort the job.
    #[must_use]
    pub fn has_fatal_failure(&self) -> bool {
        self.failures.iter().any(|f| f.fatal)
    }

    /// Asks the step to stop at the next chunk boundary.
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    /// Returns true if a stop was requested for this execution.
    #[must_use]
    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "StepExecution: name={}, status={}, exit={}, read={}, filter={}, write={}, \
             read_skip={}, process_skip={}, write_skip={}, commit={}, rollback={}",
            self.step_name,
            self.status,
            self.exit_status.exit_code,
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.process_skip_count,
            self.write_skip_count,
            self.commit_count,
            self.rollback_count,
        )
    }
}
