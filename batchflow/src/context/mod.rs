//! Execution context management.
//!
//! The execution context is the only state that survives between chunks and
//! across restarts, so it is kept as a plain serializable snapshot.

mod execution;

pub use execution::ExecutionContext;
