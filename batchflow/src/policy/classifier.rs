//! Error classification for retry and skip decisions.

use crate::errors::{ItemError, ItemErrorKind};
use std::collections::HashMap;

/// Maps error kinds to a yes/no decision with a default for unlisted kinds.
///
/// Kinds that bypass policies (`FatalConfiguration`, `ResourceAcquisition`)
/// always classify as `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    kinds: HashMap<ItemErrorKind, bool>,
    default: bool,
}

impl ErrorClassifier {
    /// Creates a classifier answering `default` for every kind.
    #[must_use]
    pub fn new(default: bool) -> Self {
        Self {
            kinds: HashMap::new(),
            default,
        }
    }

    /// Classifier accepting exactly the listed kinds.
    #[must_use]
    pub fn of(kinds: impl IntoIterator<Item = ItemErrorKind>) -> Self {
        kinds
            .into_iter()
            .fold(Self::new(false), |classifier, kind| classifier.with(kind, true))
    }

    /// Transient I/O is retryable.
    #[must_use]
    pub fn retryable_default() -> Self {
        Self::of([ItemErrorKind::TransientIo])
    }

    /// Validation failures are skippable.
    #[must_use]
    pub fn skippable_default() -> Self {
        Self::of([ItemErrorKind::Validation])
    }

    /// Sets the decision for one kind.
    #[must_use]
    pub fn with(mut self, kind: ItemErrorKind, value: bool) -> Self {
        self.kinds.insert(kind, value);
        self
    }

    /// Classifies an error.
    #[must_use]
    pub fn classify(&self, error: &ItemError) -> bool {
        if error.kind.bypasses_policies() {
            return false;
        }
        self.kinds.get(&error.kind).copied().unwrap_or(self.default)
    }
}
