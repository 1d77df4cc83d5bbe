//! Step that repeats a tasklet, one transaction per call.

use super::tasklet::{ChunkContext, RepeatStatus, Tasklet};
use crate::cancellation::StopToken;
use crate::core::{BatchStatus, ExitStatus};
use crate::domain::{StepContribution, StepExecution};
use crate::errors::{BatchError, ItemError, ItemErrorKind};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::observability::{SpanTimer, StepSpanAttributes};
use crate::repository::JobRepository;
use crate::transaction::{Transaction, TransactionManager};
use chrono::Utc;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// A unit of a job that drives its own [`StepExecution`] to a terminal status.
pub trait Step: Send + Sync + Debug {
    /// Step name, unique within a job.
    fn name(&self) -> &str;

    /// How many times the step may be started for one job instance.
    fn start_limit(&self) -> u32 {
        u32::MAX
    }

    /// Re-run the step on restart even if a previous execution completed it.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Runs the step.
    ///
    /// Failures inside the step end up in the execution's status and failure
    /// list. An error is returned only when the final state could not be
    /// persisted; the execution is then left `UNKNOWN`.
    fn execute(&self, step_execution: &mut StepExecution, stop: &StopToken) -> Result<(), BatchError>;
}

/// Runs a [`Tasklet`] until it reports [`RepeatStatus::Finished`], a stop is
/// requested or a call fails.
pub struct TaskletStep {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    repository: Arc<dyn JobRepository>,
    transaction_manager: Arc<dyn TransactionManager>,
    events: Arc<dyn EventSink>,
    start_limit: u32,
    allow_start_if_complete: bool,
}

impl TaskletStep {
    /// Creates a step.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        tasklet: Arc<dyn Tasklet>,
        repository: Arc<dyn JobRepository>,
        transaction_manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            name: name.into(),
            tasklet,
            repository,
            transaction_manager,
            events: Arc::new(NoOpEventSink),
            start_limit: u32::MAX,
            allow_start_if_complete: false,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the start limit.
    #[must_use]
    pub fn with_start_limit(mut self, limit: u32) -> Self {
        self.start_limit = limit;
        self
    }

    /// Allows re-running a completed step on restart.
    #[must_use]
    pub fn with_allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    fn run(&self, execution: &mut StepExecution, stop: &StopToken) -> Result<(), BatchError> {
        self.tasklet
            .open(&execution.execution_context)
            .map_err(|e| self.open_error(e))?;
        execution.transition_to(BatchStatus::Started)?;
        self.repository.update_step_execution(execution)?;

        loop {
            if stop.is_stop_requested() {
                execution.set_terminate_only();
            }
            if execution.is_terminate_only() {
                execution.transition_to(BatchStatus::Stopping)?;
                execution.transition_to(BatchStatus::Stopped)?;
                let reason = stop.reason().unwrap_or_else(|| "Stop requested".to_string());
                execution.exit_status = ExitStatus::stopped().with_description(reason);
                return Ok(());
            }

            if self.run_chunk(execution)? == RepeatStatus::Finished {
                execution.transition_to(BatchStatus::Completed)?;
                execution.exit_status = ExitStatus::completed();
                return Ok(());
            }
        }
    }

    /// One tasklet call inside one transaction. Counters and the context
    /// change on a staged copy that replaces `execution` only after commit.
    fn run_chunk(&self, execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        let manager = self.transaction_manager.as_ref();
        let transaction = Transaction::begin(manager)?;

        let mut contribution = StepContribution::default();
        let mut chunk_context = ChunkContext::new(execution, transaction, manager);
        let result = self.tasklet.execute(&mut contribution, &mut chunk_context);
        let (transaction, rollbacks) = chunk_context.into_parts();
        execution.rollback_count += rollbacks;

        let repeat = match result {
            Ok(repeat) => repeat,
            Err(error) => {
                self.roll_back(execution, transaction, &error);
                return Err(error);
            }
        };
        let Some(transaction) = transaction else {
            return Err(BatchError::Internal(format!(
                "Step '{}' lost its chunk transaction",
                self.name
            )));
        };

        let mut staged = execution.clone();
        staged.apply_contribution(&contribution);
        if !contribution.is_empty() {
            staged.commit_count += 1;
        }
        staged.last_updated = Some(Utc::now());

        if let Err(error) = self.persist_chunk(&mut staged) {
            self.roll_back(execution, Some(transaction), &error);
            return Err(error);
        }
        if let Err(error) = transaction.commit() {
            execution.rollback_count += 1;
            return Err(error.into());
        }
        *execution = staged;

        debug!(
            step = %self.name,
            commit = execution.commit_count,
            read = execution.read_count,
            written = execution.write_count,
            skipped = execution.skip_count(),
            "Chunk committed"
        );
        self.events.try_emit(
            types::CHUNK_COMMITTED,
            Some(json!({
                "step": self.name,
                "commit_count": execution.commit_count,
                "read": contribution.read_count,
                "written": contribution.write_count,
                "skipped": contribution.skip_count(),
            })),
        );

        Ok(repeat)
    }

    fn persist_chunk(&self, staged: &mut StepExecution) -> Result<(), BatchError> {
        self.tasklet
            .update(&mut staged.execution_context)
            .map_err(|source| BatchError::StreamUpdate {
                step: self.name.clone(),
                source,
            })?;
        staged.execution_context.mark_persisted();
        self.repository.update_step_execution(staged)?;
        self.repository.update_execution_context(staged)?;
        Ok(())
    }

    fn roll_back(&self, execution: &mut StepExecution, transaction: Option<Transaction<'_>>, error: &BatchError) {
        if let Some(tx) = transaction {
            if let Err(e) = tx.rollback() {
                warn!(step = %self.name, error = %e, "Rollback failed");
            }
        }
        execution.rollback_count += 1;
        warn!(
            step = %self.name,
            rollbacks = execution.rollback_count,
            error = %error,
            "Chunk rolled back"
        );
        self.events.try_emit(
            types::CHUNK_ROLLED_BACK,
            Some(json!({ "step": self.name, "error": error.to_string() })),
        );
    }

    fn open_error(&self, error: ItemError) -> BatchError {
        if error.kind == ItemErrorKind::FatalConfiguration {
            BatchError::FatalConfiguration(error)
        } else {
            BatchError::ResourceAcquisition {
                step: self.name.clone(),
                source: error,
            }
        }
    }

    fn mark_failed(&self, execution: &mut StepExecution, failure: &BatchError) {
        execution.add_failure(failure);
        if let Err(e) = execution.transition_to(BatchStatus::Failed) {
            warn!(step = %self.name, error = %e, "Cannot mark step failed");
            let _ = execution.transition_to(BatchStatus::Unknown);
        }
        execution.exit_status = ExitStatus::failed().with_description(failure.to_string());
    }
}

impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> u32 {
        self.start_limit
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn execute(&self, execution: &mut StepExecution, stop: &StopToken) -> Result<(), BatchError> {
        let span = info_span!(
            "step",
            step = %self.name,
            job_execution_id = %execution.job_execution_id,
            step_execution_id = %execution.id,
        );
        let _entered = span.enter();
        let timer = SpanTimer::start(self.name.clone());

        execution.start_time = Some(Utc::now());
        info!(step = %self.name, "Executing step");
        self.events.try_emit(
            types::STEP_STARTED,
            Some(json!({
                "step": self.name,
                "step_execution_id": execution.id.to_string(),
                "job_execution_id": execution.job_execution_id.to_string(),
            })),
        );

        if let Err(failure) = self.run(execution, stop) {
            error!(step = %self.name, error = %failure, "Step failed");
            self.mark_failed(execution, &failure);
        }

        if let Err(e) = self.tasklet.close() {
            error!(step = %self.name, error = %e, "Failed to close step resources");
        }

        execution.end_time = Some(Utc::now());
        execution.last_updated = execution.end_time;
        let persisted = self
            .repository
            .update_step_execution(execution)
            .and_then(|()| self.repository.update_execution_context(execution));
        if let Err(e) = persisted {
            let failure = BatchError::from(e);
            error!(step = %self.name, error = %failure, "Failed to persist final step state");
            execution.add_failure(&failure);
            let _ = execution.transition_to(BatchStatus::Unknown);
            execution.exit_status = ExitStatus::unknown().with_description(failure.to_string());
            return Err(failure);
        }

        let attributes = StepSpanAttributes::from_execution(execution).with_duration_ms(timer.finish());
        let event_type = match execution.status() {
            BatchStatus::Completed => types::STEP_COMPLETED,
            BatchStatus::Stopped => types::STEP_STOPPED,
            _ => types::STEP_FAILED,
        };
        info!(
            step = %self.name,
            status = %execution.status(),
            duration_ms = attributes.duration_ms.unwrap_or_default(),
            "{}",
            execution.summary()
        );
        self.events.try_emit(event_type, Some(attributes.to_event_data()));

        Ok(())
    }
}

impl Debug for TaskletStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskletStep")
            .field("name", &self.name)
            .field("start_limit", &self.start_limit)
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .field("transaction_manager", &self.transaction_manager)
            .finish_non_exhaustive()
    }
}
