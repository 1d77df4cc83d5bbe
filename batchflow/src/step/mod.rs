//! Steps and the chunk-oriented processing loop.
//!
//! A [`TaskletStep`] runs its [`Tasklet`] once per transaction until the
//! tasklet reports it is finished. [`ChunkOrientedTasklet`] is the tasklet
//! behind every chunk step: read, process and write one chunk.

mod builder;
mod chunk;
mod tasklet;
mod tasklet_step;

pub use builder::{ChunkStepBuilder, StepBuilder};
pub use chunk::{ChunkOrientedTasklet, ChunkResult, FaultTolerance};
pub use tasklet::{ChunkContext, RepeatStatus, Tasklet};
pub use tasklet_step::{Step, TaskletStep};
