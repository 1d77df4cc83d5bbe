//! Job and step execution records.

mod job_execution;
mod parameters;
mod step_execution;

pub use job_execution::{FailureReport, JobExecution, JobInstance};
pub use parameters::{JobParameter, JobParameters, ParameterValue};
pub use step_execution::{FailureRecord, StepContribution, StepExecution};
