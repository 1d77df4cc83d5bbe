//! # Batchflow
//!
//! A chunk-oriented batch execution engine.
//!
//! Batchflow runs jobs made of steps. A chunk step reads items one at a
//! time, processes them, and writes them in chunks, one transaction per
//! chunk, with:
//!
//! - **Retry and skip**: transient failures are retried, bad items are skipped
//!   within configured limits, and a failed write is scanned item by item
//! - **Checkpoint and restart**: reader and writer positions are saved in the
//!   execution context at every commit, so a failed job resumes where it stopped
//! - **Flows**: conditional transitions on exit codes and parallel splits
//! - **Operations**: launching, stopping and abandoning executions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchflow::prelude::*;
//!
//! let repository = Arc::new(InMemoryJobRepository::new());
//!
//! let load = StepBuilder::new("load", repository.clone())
//!     .chunk::<Record>(100)
//!     .reader(CsvReader::new("input.csv"))
//!     .processor(Validate)
//!     .writer(DbWriter::new(pool))
//!     .skip_limit(10)
//!     .build()?;
//!
//! let job = JobBuilder::new("import", repository.clone())
//!     .step(load)
//!     .build()?;
//!
//! let launcher = JobLauncher::new(repository);
//! let execution = launcher
//!     .run(&job, JobParameters::new().with_string("input", "input.csv"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod domain;
pub mod errors;
pub mod events;
pub mod item;
pub mod job;
pub mod observability;
pub mod policy;
pub mod repository;
pub mod step;
pub mod testing;
pub mod transaction;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::StopToken;
    pub use crate::config::{FaultToleranceConfig, StepConfig};
    pub use crate::context::ExecutionContext;
    pub use crate::core::{BatchStatus, ExitStatus};
    pub use crate::domain::{
        JobExecution, JobInstance, JobParameters, ParameterValue, StepContribution,
        StepExecution,
    };
    pub use crate::errors::{
        BatchError, ChunkPhase, ItemError, ItemErrorKind, JobRestartError,
        JobValidationError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::item::{
        Chunk, ItemProcessor, ItemReader, ItemStream, ItemWriter, ListItemReader,
        ListItemWriter,
    };
    pub use crate::job::{
        FlowBuilder, Job, JobBuilder, JobLauncher, JobOperator, Transition,
    };
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::policy::{BackoffConfig, RetryPolicy, SkipPolicy};
    pub use crate::repository::{InMemoryJobRepository, JobRepository};
    pub use crate::step::{RepeatStatus, Step, StepBuilder, Tasklet};
    pub use crate::transaction::{ResourcelessTransactionManager, TransactionManager};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_a_job() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let step = StepBuilder::new("load", repository.clone())
            .chunk::<u32>(2)
            .reader(ListItemReader::new("numbers", vec![1, 2, 3]))
            .writer(ListItemWriter::new())
            .build();
        assert!(step.is_ok());
    }
}
