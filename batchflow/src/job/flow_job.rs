//! The job: a flow of steps run as one execution.

use super::flow::{Flow, RunContext};
use super::validator::JobParametersValidator;
use crate::cancellation::StopToken;
use crate::core::{BatchStatus, ExitStatus};
use crate::domain::{JobExecution, JobParameters};
use crate::errors::BatchError;
use crate::events::{types, EventSink};
use crate::repository::JobRepository;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// A validated, runnable job. Build one with [`JobBuilder`](super::JobBuilder).
pub struct Job {
    pub(crate) name: String,
    pub(crate) flow: Flow,
    pub(crate) restartable: bool,
    pub(crate) repository: Arc<dyn JobRepository>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) validator: Option<Arc<dyn JobParametersValidator>>,
}

impl Job {
    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether a failed or stopped execution may be restarted.
    #[must_use]
    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    /// Returns the top-level flow.
    #[must_use]
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Names of all steps, splits included.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.flow.step_names()
    }

    /// Runs the configured parameter validator, if any.
    pub fn validate_parameters(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        self.validator
            .as_ref()
            .map_or(Ok(()), |validator| validator.validate(parameters))
    }

    /// Runs `execution` to a terminal status.
    ///
    /// Failures end up in the execution's status, exit status and failure
    /// lists; this never returns an error.
    pub async fn execute(&self, execution: &mut JobExecution, stop: Arc<StopToken>) {
        let span = info_span!("job", job = %self.name, execution_id = %execution.id);
        self.run(execution, stop).instrument(span).await;
    }

    async fn run(&self, execution: &mut JobExecution, stop: Arc<StopToken>) {
        execution.start_time = Some(Utc::now());
        execution.status = BatchStatus::Started;
        info!(job = %self.name, parameters = ?execution.job_parameters.keys(), "Job started");

        if let Err(e) = self.repository.update_job_execution(execution) {
            self.fail(execution, &e.into());
            self.finish(execution).await;
            return;
        }
        self.events
            .emit(
                types::JOB_STARTED,
                Some(json!({
                    "job": self.name,
                    "execution_id": execution.id.to_string(),
                    "instance_id": execution.job_instance.id.to_string(),
                })),
            )
            .await;

        let ctx = Arc::new(RunContext::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.events),
            Arc::clone(&stop),
            execution.job_instance.clone(),
            execution.id,
        ));
        let result = self.flow.run(&ctx).await;
        execution.step_executions.extend(ctx.take_step_executions());

        match result {
            Ok(outcome) => {
                if outcome.fatal {
                    error!(job = %self.name, "Fatal step failure, aborting job");
                }
                execution.status = outcome.status;
                execution.exit_status = match outcome.status {
                    BatchStatus::Stopped => match stop.reason() {
                        Some(reason) => ExitStatus::stopped().with_description(reason),
                        None => outcome.exit_status,
                    },
                    _ => outcome.exit_status,
                };
            }
            Err(e) => self.fail(execution, &e),
        }

        self.finish(execution).await;
    }

    fn fail(&self, execution: &mut JobExecution, failure: &BatchError) {
        error!(job = %self.name, error = %failure, "Job failed");
        execution.add_failure(failure);
        execution.status = BatchStatus::Failed;
        execution.exit_status = ExitStatus::failed().with_description(failure.to_string());
    }

    async fn finish(&self, execution: &mut JobExecution) {
        execution.end_time = Some(Utc::now());
        execution.last_updated = execution.end_time;

        let persisted = self
            .repository
            .update_job_execution_context(execution)
            .and_then(|()| self.repository.update_job_execution(execution));
        if let Err(e) = persisted {
            let failure = BatchError::from(e);
            warn!(job = %self.name, error = %failure, "Failed to persist final job state");
            execution.add_failure(&failure);
            execution.status = BatchStatus::Unknown;
            execution.exit_status = ExitStatus::unknown().with_description(failure.to_string());
        }

        let event_type = match execution.status {
            BatchStatus::Completed => types::JOB_COMPLETED,
            BatchStatus::Stopped => types::JOB_STOPPED,
            _ => types::JOB_FAILED,
        };
        let duration_ms = execution
            .start_time
            .zip(execution.end_time)
            .map_or(0, |(start, end)| (end - start).num_milliseconds());

        info!(
            job = %self.name,
            status = %execution.status,
            exit_code = %execution.exit_status.exit_code,
            steps = execution.step_executions.len(),
            duration_ms,
            "Job finished"
        );
        if let Some(report) = execution.failure_report() {
            error!(job = %self.name, "{report}");
        }

        self.events
            .emit(
                event_type,
                Some(json!({
                    "job": self.name,
                    "execution_id": execution.id.to_string(),
                    "status": execution.status.to_string(),
                    "exit_code": execution.exit_status.exit_code,
                    "duration_ms": duration_ms,
                })),
            )
            .await;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("restartable", &self.restartable)
            .field("flow", &self.flow)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
