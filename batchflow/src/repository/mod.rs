//! Persistence of job metadata.
//!
//! The engine records instances, executions and execution contexts through
//! [`JobRepository`]. `update_step_execution` and `update_execution_context`
//! run once per chunk, inside the chunk's transaction; a failure there rolls
//! the chunk back.

mod memory;

pub use memory::InMemoryJobRepository;

use crate::domain::{JobExecution, JobInstance, JobParameters, StepExecution};
use crate::errors::RepositoryError;
use uuid::Uuid;

/// Persistence capability for job and step executions.
#[cfg_attr(test, mockall::automock)]
pub trait JobRepository: Send + Sync {
    /// Returns the instance for `(job_name, parameters)`, creating it on first use.
    fn get_or_create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError>;

    /// Returns the instance for `(job_name, parameters)`, if one exists.
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError>;

    /// Creates a new execution of `instance`.
    ///
    /// Fails with `RepositoryError::Conflict` while another execution of the
    /// instance is running.
    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError>;

    /// Persists job execution status and timestamps.
    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    /// Persists the job-level execution context.
    fn update_job_execution_context(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    /// Loads a job execution with its step executions.
    fn get_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError>;

    /// Returns the most recently created execution of `instance`.
    fn get_last_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    /// Returns the executions of `job_name` that are still running.
    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, RepositoryError>;

    /// Registers a new step execution.
    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError>;

    /// Persists step execution status and counters.
    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError>;

    /// Persists the step execution context.
    fn update_execution_context(&self, step_execution: &StepExecution) -> Result<(), RepositoryError>;

    /// Returns the latest execution of `step_name` across all executions of `instance`.
    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError>;

    /// Returns how many times `step_name` has been started for `instance`.
    fn get_step_execution_count(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<u32, RepositoryError>;
}
