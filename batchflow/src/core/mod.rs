//! Core status types shared by jobs and steps.

mod status;

pub use status::{BatchStatus, ExitStatus};
