//! Skip policies.

use super::classifier::ErrorClassifier;
use crate::errors::{ItemError, SkipLimitExceededError};
use std::fmt::Debug;

/// Decides whether a failed item may be left out of the chunk.
pub trait SkipPolicy: Send + Sync + Debug {
    /// Returns `Ok(true)` to skip, `Ok(false)` if the error is not skippable
    /// and `Err` if it is skippable but the limit is reached.
    ///
    /// `skip_count` is the number of items already skipped under this policy.
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> Result<bool, SkipLimitExceededError>;
}

/// Skips classified errors up to a limit.
#[derive(Debug, Clone)]
pub struct LimitCheckingSkipPolicy {
    skip_limit: u64,
    classifier: ErrorClassifier,
}

impl LimitCheckingSkipPolicy {
    /// Skips validation errors up to `skip_limit`.
    #[must_use]
    pub fn new(skip_limit: u64) -> Self {
        Self::with_classifier(skip_limit, ErrorClassifier::skippable_default())
    }

    /// Skips errors accepted by `classifier` up to `skip_limit`.
    #[must_use]
    pub fn with_classifier(skip_limit: u64, classifier: ErrorClassifier) -> Self {
        Self {
            skip_limit,
            classifier,
        }
    }

    /// Returns the limit.
    #[must_use]
    pub fn skip_limit(&self) -> u64 {
        self.skip_limit
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> Result<bool, SkipLimitExceededError> {
        if !self.classifier.classify(error) {
            return Ok(false);
        }
        if skip_count >= self.skip_limit {
            return Err(SkipLimitExceededError::new(self.skip_limit, error.clone()));
        }
        Ok(true)
    }
}

/// Skips every error that does not bypass policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSkipItemSkipPolicy;

impl SkipPolicy for AlwaysSkipItemSkipPolicy {
    fn should_skip(&self, error: &ItemError, _skip_count: u64) -> Result<bool, SkipLimitExceededError> {
        Ok(!error.kind.bypasses_policies())
    }
}

/// Never skips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkipItemSkipPolicy;

impl SkipPolicy for NeverSkipItemSkipPolicy {
    fn should_skip(&self, _error: &ItemError, _skip_count: u64) -> Result<bool, SkipLimitExceededError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_limit_checking() {
        let policy = LimitCheckingSkipPolicy::new(2);
        let err = ItemError::validation("bad");

        assert_eq!(policy.should_skip(&err, 0), Ok(true));
        assert_eq!(policy.should_skip(&err, 1), Ok(true));

        let exceeded = policy.should_skip(&err, 2).unwrap_err();
        assert_eq!(exceeded.limit, 2);
        assert_eq!(exceeded.source, err);
    }

    #[test]
    fn test_non_skippable_is_not_a_limit_error() {
        let policy = LimitCheckingSkipPolicy::new(0);
        assert_eq!(policy.should_skip(&ItemError::transient_io("x"), 5), Ok(false));
    }

    #[test]
    fn test_zero_limit_rejects_first_skip() {
        let policy = LimitCheckingSkipPolicy::new(0);
        assert!(policy.should_skip(&ItemError::validation("x"), 0).is_err());
    }

    #[test]
    fn test_always_and_never() {
        let err = ItemError::other("quota", "x");
        assert_eq!(AlwaysSkipItemSkipPolicy.should_skip(&err, 1_000), Ok(true));
        assert_eq!(
            AlwaysSkipItemSkipPolicy.should_skip(&ItemError::fatal_configuration("x"), 0),
            Ok(false)
        );
        assert_eq!(NeverSkipItemSkipPolicy.should_skip(&err, 0), Ok(false));
    }
}
