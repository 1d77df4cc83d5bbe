//! Observability utilities.

mod logging;
mod tracing;

pub use self::logging::{init_tracing, LogFormat, LoggingConfig, LoggingInitError};
pub use self::tracing::{SpanTimer, StepSpanAttributes};
