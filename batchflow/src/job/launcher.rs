//! Launching job executions.

use super::flow_job::Job;
use crate::cancellation::StopToken;
use crate::core::BatchStatus;
use crate::domain::{JobExecution, JobParameters};
use crate::errors::{BatchError, JobRestartError, RepositoryError};
use crate::repository::JobRepository;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Resolves the job instance, checks that it may run, and runs a new
/// execution of it.
///
/// Keeps a stop token for every execution it is running so a
/// [`JobOperator`](super::JobOperator) can stop it.
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    running: DashMap<Uuid, Arc<StopToken>>,
}

impl JobLauncher {
    /// Creates a launcher.
    #[must_use]
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            running: DashMap::new(),
        }
    }

    /// Returns the repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Runs `job` with `parameters` and returns the finished execution.
    ///
    /// A new instance is created for unseen identifying parameters. For a
    /// known instance the last execution must be restartable; the new
    /// execution then inherits its job-level context and every step resumes
    /// from its last checkpoint.
    ///
    /// # Errors
    ///
    /// Launch-time rejections: invalid parameters, an execution already
    /// running, an instance already complete, or a job that is not
    /// restartable. Failures while running are reported in the returned
    /// execution instead.
    pub async fn run(&self, job: &Job, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        job.validate_parameters(&parameters)?;

        let instance = self
            .repository
            .get_or_create_job_instance(job.name(), &parameters)?;
        let previous = self.repository.get_last_job_execution(&instance)?;

        if let Some(last) = &previous {
            if last.is_running() {
                return Err(JobRestartError::AlreadyRunning {
                    job: job.name().to_string(),
                    execution_id: last.id.to_string(),
                }
                .into());
            }
            match last.status {
                BatchStatus::Completed | BatchStatus::Abandoned => {
                    return Err(JobRestartError::AlreadyComplete {
                        job: job.name().to_string(),
                        status: last.status,
                    }
                    .into());
                }
                BatchStatus::Unknown => {
                    return Err(JobRestartError::IllegalStatus {
                        job: job.name().to_string(),
                        status: last.status,
                    }
                    .into());
                }
                _ => {}
            }
            if !job.is_restartable() {
                return Err(JobRestartError::NotRestartable {
                    job: job.name().to_string(),
                }
                .into());
            }
        }

        let mut execution = self
            .repository
            .create_job_execution(&instance, &parameters)
            .map_err(|e| match e {
                RepositoryError::Conflict(reason) => BatchError::from(JobRestartError::AlreadyRunning {
                    job: job.name().to_string(),
                    execution_id: reason,
                }),
                other => other.into(),
            })?;

        if let Some(last) = &previous {
            info!(
                job = %job.name(),
                previous = %last.id,
                previous_status = %last.status,
                "Restarting job instance"
            );
            execution.execution_context = last.execution_context.resume();
            self.repository.update_job_execution_context(&execution)?;
        }

        let stop = Arc::new(StopToken::new());
        self.running.insert(execution.id, Arc::clone(&stop));
        debug!(job = %job.name(), execution_id = %execution.id, "Launching job execution");

        job.execute(&mut execution, stop).await;

        self.running.remove(&execution.id);
        Ok(execution)
    }

    /// Asks a running execution to stop. Returns false if this launcher is
    /// not running it.
    pub fn request_stop(&self, execution_id: Uuid, reason: &str) -> bool {
        match self.running.get(&execution_id) {
            Some(token) => {
                token.request_stop(reason);
                true
            }
            None => false,
        }
    }

    /// Returns true while this launcher runs `execution_id`.
    #[must_use]
    pub fn is_running(&self, execution_id: Uuid) -> bool {
        self.running.contains_key(&execution_id)
    }

    /// Ids of the executions this launcher is running.
    #[must_use]
    pub fn running_executions(&self) -> Vec<Uuid> {
        self.running.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for JobLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLauncher")
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}
