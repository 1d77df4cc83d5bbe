//! Operational control over job executions.

use super::flow_job::Job;
use super::launcher::JobLauncher;
use crate::core::BatchStatus;
use crate::domain::JobExecution;
use crate::errors::{BatchError, JobRestartError, RepositoryError};
use crate::repository::JobRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Stops, abandons and restarts executions.
pub struct JobOperator {
    repository: Arc<dyn JobRepository>,
    launcher: Arc<JobLauncher>,
}

impl JobOperator {
    /// Creates an operator over the executions `launcher` runs.
    #[must_use]
    pub fn new(repository: Arc<dyn JobRepository>, launcher: Arc<JobLauncher>) -> Self {
        Self {
            repository,
            launcher,
        }
    }

    fn load(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        self.repository
            .get_job_execution(execution_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {execution_id}")).into())
    }

    /// Stops a running execution.
    ///
    /// An execution run by this operator's launcher is flagged `STOPPING`;
    /// the job notices at the next chunk boundary, or before its next step,
    /// and ends `STOPPED`. Any other execution has no live process left to
    /// finish it, so it is marked `STOPPED` and ended here.
    ///
    /// # Errors
    ///
    /// Returns `JobRestartError::NotRunning` if the execution has finished.
    pub fn stop(&self, execution_id: Uuid) -> Result<(), BatchError> {
        let mut execution = self.load(execution_id)?;
        if !execution.is_running() {
            return Err(JobRestartError::NotRunning(execution_id.to_string()).into());
        }

        if self.launcher.is_running(execution_id) {
            execution.status = BatchStatus::Stopping;
            self.repository.update_job_execution(&execution)?;
            self.launcher.request_stop(execution_id, "stop requested by operator");
            info!(job = %execution.job_name(), execution_id = %execution_id, "Stop requested");
            return Ok(());
        }

        warn!(
            job = %execution.job_name(),
            execution_id = %execution_id,
            status = %execution.status,
            "Execution has no live launcher; marking it stopped"
        );
        execution.status = BatchStatus::Stopped;
        execution.end_time = Some(Utc::now());
        self.repository.update_job_execution(&execution)?;
        Ok(())
    }

    /// Marks a finished, unsuccessful execution `ABANDONED` so it can never
    /// be restarted. Its failed and stopped steps are abandoned with it.
    ///
    /// A stored `STOPPING` execution that no launcher runs any more counts
    /// as finished.
    ///
    /// # Errors
    ///
    /// Fails if the execution is still running or has already completed.
    pub fn abandon(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let mut execution = self.load(execution_id)?;
        let orphaned_stop =
            execution.status == BatchStatus::Stopping && !self.launcher.is_running(execution_id);
        if execution.is_running() && !orphaned_stop {
            return Err(JobRestartError::AlreadyRunning {
                job: execution.job_name().to_string(),
                execution_id: execution_id.to_string(),
            }
            .into());
        }
        if matches!(execution.status, BatchStatus::Completed | BatchStatus::Abandoned) {
            return Err(JobRestartError::AlreadyComplete {
                job: execution.job_name().to_string(),
                status: execution.status,
            }
            .into());
        }

        for step in &mut execution.step_executions {
            if matches!(step.status(), BatchStatus::Failed | BatchStatus::Stopped) {
                step.transition_to(BatchStatus::Abandoned)?;
                self.repository.update_step_execution(step)?;
            }
        }

        execution.status = BatchStatus::Abandoned;
        execution.end_time = execution.end_time.or_else(|| Some(Utc::now()));
        self.repository.update_job_execution(&execution)?;

        info!(job = %execution.job_name(), execution_id = %execution_id, "Job execution abandoned");
        Ok(execution)
    }

    /// Restarts `job` from the failed or stopped execution `execution_id`
    /// using its original parameters.
    ///
    /// # Errors
    ///
    /// Fails if the execution belongs to another job, or with any launcher
    /// rejection.
    pub async fn restart(&self, job: &Job, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let previous = self.load(execution_id)?;
        if previous.job_name() != job.name() {
            return Err(BatchError::InvalidParameters(format!(
                "execution {execution_id} belongs to job '{}', not '{}'",
                previous.job_name(),
                job.name()
            )));
        }
        self.launcher.run(job, previous.job_parameters).await
    }

    /// Ids of the running executions of `job_name`.
    pub fn running_executions(&self, job_name: &str) -> Result<Vec<Uuid>, BatchError> {
        Ok(self
            .repository
            .find_running_job_executions(job_name)?
            .into_iter()
            .map(|execution| execution.id)
            .collect())
    }
}

impl std::fmt::Debug for JobOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOperator")
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}
