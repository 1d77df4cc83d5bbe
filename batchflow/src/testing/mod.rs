//! Testing utilities for batch jobs.
//!
//! This module provides:
//! - Scripted readers, processors and writers that fail on chosen items
//! - Assertions on step and job executions

mod assertions;
mod mocks;

pub use assertions::{assert_job_status, assert_step_counts, StepCounts};
pub use mocks::{FailingItemProcessor, FailingItemWriter, ScriptedReader, WriteLog};
