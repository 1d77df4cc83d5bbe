//! Retry policies and the retry template that applies them.

use super::backoff::BackoffConfig;
use super::classifier::ErrorClassifier;
use crate::errors::ItemError;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on attempts for policies that would otherwise retry forever.
pub const RETRY_ATTEMPT_CEILING: u32 = 1_000;

/// Decides whether a failed item operation is attempted again.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Returns true if the operation should run again.
    ///
    /// `attempt` is the number of attempts already made, including the one
    /// that just failed.
    fn should_retry(&self, error: &ItemError, attempt: u32) -> bool;

    /// Maximum attempts per operation, including the first.
    fn max_attempts(&self) -> u32;
}

/// Retries classified errors up to a maximum number of attempts.
#[derive(Debug, Clone)]
pub struct SimpleRetryPolicy {
    max_attempts: u32,
    classifier: ErrorClassifier,
}

impl SimpleRetryPolicy {
    /// Retries transient I/O failures, making at most `max_attempts` attempts.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self::with_classifier(max_attempts, ErrorClassifier::retryable_default())
    }

    /// Retries errors accepted by `classifier`.
    #[must_use]
    pub fn with_classifier(max_attempts: u32, classifier: ErrorClassifier) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, RETRY_ATTEMPT_CEILING),
            classifier,
        }
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn should_retry(&self, error: &ItemError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.classifier.classify(error)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn should_retry(&self, _error: &ItemError, _attempt: u32) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        1
    }
}

/// Retries every error that does not bypass policies, up to
/// [`RETRY_ATTEMPT_CEILING`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryPolicy;

impl RetryPolicy for AlwaysRetryPolicy {
    fn should_retry(&self, error: &ItemError, attempt: u32) -> bool {
        attempt < RETRY_ATTEMPT_CEILING && !error.kind.bypasses_policies()
    }

    fn max_attempts(&self) -> u32 {
        RETRY_ATTEMPT_CEILING
    }
}

/// State of the item operation in progress. Fresh for every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts already made.
    pub attempt: u32,
    /// Error from the previous attempt.
    pub last_error: Option<ItemError>,
}

/// The final failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// Error from the last attempt.
    pub error: ItemError,
    /// Attempts made.
    pub attempts: u32,
}

impl RetryFailure {
    /// Returns true if the operation was attempted more than once.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempts > 1
    }
}

/// Runs an item operation under a retry policy with backoff.
#[derive(Debug, Clone)]
pub struct RetryTemplate {
    policy: Arc<dyn RetryPolicy>,
    backoff: BackoffConfig,
}

impl RetryTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(policy: Arc<dyn RetryPolicy>, backoff: BackoffConfig) -> Self {
        Self { policy, backoff }
    }

    /// A template that never retries.
    #[must_use]
    pub fn never() -> Self {
        Self::new(Arc::new(NeverRetryPolicy), BackoffConfig::none())
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    /// Returns the backoff.
    #[must_use]
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Runs `operation` until it succeeds or the policy gives up.
    ///
    /// Errors that bypass policies are returned after the first attempt.
    pub fn execute<T, F>(&self, operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut(&RetryContext) -> Result<T, ItemError>,
    {
        self.execute_from(0, operation)
    }

    /// Like [`execute`](Self::execute), for an operation that has already
    /// been attempted `prior_attempts` times. Those attempts count against
    /// the policy, so the operation always runs once and is retried only
    /// while budget remains.
    pub fn execute_from<T, F>(&self, prior_attempts: u32, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut(&RetryContext) -> Result<T, ItemError>,
    {
        let mut context = RetryContext {
            attempt: prior_attempts,
            last_error: None,
        };
        loop {
            match operation(&context) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    context.attempt += 1;
                    if error.kind.bypasses_policies() || !self.policy.should_retry(&error, context.attempt) {
                        return Err(RetryFailure {
                            error,
                            attempts: context.attempt,
                        });
                    }
                    debug!(
                        attempt = context.attempt,
                        max_attempts = self.policy.max_attempts(),
                        error = %error,
                        "Retrying item operation"
                    );
                    self.backoff.pause(context.attempt);
                    context.last_error = Some(error);
                }
            }
        }
    }
}

impl Default for RetryTemplate {
    fn default() -> Self {
        Self::never()
    }
}
