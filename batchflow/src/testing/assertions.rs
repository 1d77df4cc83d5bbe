//! Test assertions for job and step executions.

use crate::core::BatchStatus;
use crate::domain::{JobExecution, StepExecution};

/// Expected counters of a step execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounts {
    /// Items read.
    pub read: u64,
    /// Items written.
    pub write: u64,
    /// Items filtered.
    pub filter: u64,
    /// Skips across all phases.
    pub skip: u64,
    /// Committed chunks.
    pub commit: u64,
}

impl StepCounts {
    /// Captures the counters of `execution`.
    #[must_use]
    pub fn of(execution: &StepExecution) -> Self {
        Self {
            read: execution.read_count,
            write: execution.write_count,
            filter: execution.filter_count,
            skip: execution.skip_count(),
            commit: execution.commit_count,
        }
    }
}

/// Asserts that the job execution ended with the expected status.
pub fn assert_job_status(execution: &JobExecution, expected: BatchStatus) {
    assert_eq!(
        execution.status,
        expected,
        "Expected job status {}, got {} (exit: {}, failures: {:?})",
        expected,
        execution.status,
        execution.exit_status,
        execution.all_failures()
    );
}

/// Asserts the counters of the latest execution of `step_name`.
pub fn assert_step_counts(execution: &JobExecution, step_name: &str, expected: StepCounts) {
    let Some(step) = execution.step_execution(step_name) else {
        panic!("No execution of step '{step_name}' in job execution {}", execution.id);
    };
    assert_eq!(
        StepCounts::of(step),
        expected,
        "Unexpected counters for step '{}': {}",
        step_name,
        step.summary()
    );
}
