//! Job instances, job executions and the failure report.

use super::parameters::JobParameters;
use super::step_execution::{FailureRecord, StepExecution};
use crate::context::ExecutionContext;
use crate::core::{BatchStatus, ExitStatus};
use crate::errors::BatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The logical identity of a job run: job name plus identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobInstance {
    /// Unique id.
    pub id: Uuid,
    /// Job name.
    pub job_name: String,
    /// Key derived from the identifying parameters.
    pub job_key: String,
}

impl JobInstance {
    /// Creates a new instance for a job and parameter set.
    #[must_use]
    pub fn new(job_name: impl Into<String>, parameters: &JobParameters) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_name: job_name.into(),
            job_key: parameters.job_key(),
        }
    }
}

/// One physical attempt to run a [`JobInstance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    /// Unique id.
    pub id: Uuid,
    /// The instance being run.
    pub job_instance: JobInstance,
    /// Launch parameters.
    pub job_parameters: JobParameters,
    /// Current status.
    pub status: BatchStatus,
    /// Exit status.
    pub exit_status: ExitStatus,
    /// When the execution was created.
    pub create_time: DateTime<Utc>,
    /// When the execution started running.
    pub start_time: Option<DateTime<Utc>>,
    /// When the execution finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Last persisted update.
    pub last_updated: Option<DateTime<Utc>>,
    /// Step executions in the order they ran.
    pub step_executions: Vec<StepExecution>,
    /// Job-level context.
    pub execution_context: ExecutionContext,
    /// Failures recorded at job level.
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl JobExecution {
    /// Creates a new execution in `STARTING`.
    #[must_use]
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
        }
    }

    /// Returns the job name.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    /// Returns true while the execution is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.end_time.is_none() && self.status.is_running()
    }

    /// Raises the status to `status` if it is more severe.
    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Records a job-level failure.
    pub fn add_failure(&mut self, error: &BatchError) {
        self.failures.push(FailureRecord::from_error(None, error));
    }

    /// Returns every failure recorded on the job and its steps.
    #[must_use]
    pub fn all_failures(&self) -> Vec<&FailureRecord> {
        self.failures
            .iter()
            .chain(self.step_executions.iter().flat_map(|s| s.failures.iter()))
            .collect()
    }

    /// Returns the latest execution of a step in this job execution.
    #[must_use]
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }

    /// Builds a report naming the failing step, its error and counters.
    ///
    /// Returns `None` unless the execution failed.
    #[must_use]
    pub fn failure_report(&self) -> Option<FailureReport> {
        if self.status != BatchStatus::Failed {
            return None;
        }

        let failed_step = self
            .step_executions
            .iter()
            .rev()
            .find(|s| s.status() == BatchStatus::Failed);

        let error = failed_step
            .and_then(|s| s.failures.last())
            .or_else(|| self.failures.last())
            .map_or_else(|| self.exit_status.exit_description.clone(), |f| f.error.clone());

        Some(match failed_step {
            Some(step) => FailureReport {
                job_name: self.job_name().to_string(),
                execution_id: self.id,
                step_name: Some(step.step_name.clone()),
                error,
                read_count: step.read_count,
                write_count: step.write_count,
                skip_count: step.skip_count(),
                commit_count: step.commit_count,
                rollback_count: step.rollback_count,
            },
            None => FailureReport {
                job_name: self.job_name().to_string(),
                execution_id: self.id,
                step_name: None,
                error,
                read_count: 0,
                write_count: 0,
                skip_count: 0,
                commit_count: 0,
                rollback_count: 0,
            },
        })
    }
}

/// Diagnostic summary of a failed job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Job name.
    pub job_name: String,
    /// Failed execution.
    pub execution_id: Uuid,
    /// The step that failed, if the failure happened inside a step.
    pub step_name: Option<String>,
    /// The triggering error.
    pub error: String,
    /// Items read by the failed step.
    pub read_count: u64,
    /// Items written by the failed step.
    pub write_count: u64,
    /// Items skipped by the failed step.
    pub skip_count: u64,
    /// Chunks committed by the failed step.
    pub commit_count: u64,
    /// Rollbacks in the failed step.
    pub rollback_count: u64,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job '{}' execution {} failed",
            self.job_name, self.execution_id
        )?;
        if let Some(step) = &self.step_name {
            write!(f, " in step '{step}'")?;
        }
        write!(
            f,
            ": {} (read={}, write={}, skip={}, commit={}, rollback={})",
            self.error,
            self.read_count,
            self.write_count,
            self.skip_count,
            self.commit_count,
            self.rollback_count
        )
    }
}
