//! Retry, skip and backoff policies.
//!
//! Retry is always consulted first. The skip policy only sees an error once
//! the retry policy has given up on it.

mod backoff;
mod classifier;
mod retry;
mod skip;

pub use backoff::{BackoffConfig, BackoffStrategy, JitterStrategy};
pub use classifier::ErrorClassifier;
pub use retry::{
    AlwaysRetryPolicy, NeverRetryPolicy, RetryContext, RetryFailure, RetryPolicy, RetryTemplate,
    SimpleRetryPolicy, RETRY_ATTEMPT_CEILING,
};
pub use skip::{AlwaysSkipItemSkipPolicy, LimitCheckingSkipPolicy, NeverSkipItemSkipPolicy, SkipPolicy};
