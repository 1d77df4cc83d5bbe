//! Serializable step configuration.
//!
//! Everything a [`StepBuilder`](crate::step::StepBuilder) needs apart from
//! the reader, processor and writer can be loaded from JSON.

use crate::errors::ItemErrorKind;
use crate::policy::BackoffConfig;
use serde::{Deserialize, Serialize};

fn default_commit_interval() -> usize {
    10
}

fn default_start_limit() -> u32 {
    u32::MAX
}

fn default_retry_limit() -> u32 {
    1
}

fn default_retryable() -> Vec<ItemErrorKind> {
    vec![ItemErrorKind::TransientIo]
}

fn default_skippable() -> Vec<ItemErrorKind> {
    vec![ItemErrorKind::Validation]
}

/// Retry and skip settings for a chunk step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultToleranceConfig {
    /// Attempts per item operation, including the first.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Error kinds worth retrying.
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ItemErrorKind>,
    /// Total skips allowed across all phases.
    #[serde(default)]
    pub skip_limit: u64,
    /// Error kinds that may be skipped.
    #[serde(default = "default_skippable")]
    pub skippable: Vec<ItemErrorKind>,
    /// Read skips allowed. Defaults to `skip_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_skip_limit: Option<u64>,
    /// Process skips allowed. Defaults to `skip_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_skip_limit: Option<u64>,
    /// Write skips allowed. Defaults to `skip_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_skip_limit: Option<u64>,
    /// Delay between retries.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            retryable: default_retryable(),
            skip_limit: 0,
            skippable: default_skippable(),
            read_skip_limit: None,
            process_skip_limit: None,
            write_skip_limit: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl FaultToleranceConfig {
    /// Creates the default configuration: no retries, no skips.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempts per item operation.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the total skip limit.
    #[must_use]
    pub fn with_skip_limit(mut self, limit: u64) -> Self {
        self.skip_limit = limit;
        self
    }

    /// Sets the retryable kinds.
    #[must_use]
    pub fn with_retryable(mut self, kinds: Vec<ItemErrorKind>) -> Self {
        self.retryable = kinds;
        self
    }

    /// Sets the skippable kinds.
    #[must_use]
    pub fn with_skippable(mut self, kinds: Vec<ItemErrorKind>) -> Self {
        self.skippable = kinds;
        self
    }

    /// Sets the backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Effective read skip limit.
    #[must_use]
    pub fn effective_read_skip_limit(&self) -> u64 {
        self.read_skip_limit.unwrap_or(self.skip_limit)
    }

    /// Effective process skip limit.
    #[must_use]
    pub fn effective_process_skip_limit(&self) -> u64 {
        self.process_skip_limit.unwrap_or(self.skip_limit)
    }

    /// Effective write skip limit.
    #[must_use]
    pub fn effective_write_skip_limit(&self) -> u64 {
        self.write_skip_limit.unwrap_or(self.skip_limit)
    }
}

/// Settings of a chunk-oriented step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Items per chunk.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,
    /// How many times the step may be started for one job instance.
    #[serde(default = "default_start_limit")]
    pub start_limit: u32,
    /// Re-run the step on restart even if it completed before.
    #[serde(default)]
    pub allow_start_if_complete: bool,
    /// Call the writer with chunks whose items were all skipped or filtered.
    #[serde(default)]
    pub write_empty_chunks: bool,
    /// Retry and skip settings.
    #[serde(default)]
    pub fault_tolerance: FaultToleranceConfig,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            commit_interval: default_commit_interval(),
            start_limit: default_start_limit(),
            allow_start_if_complete: false,
            write_empty_chunks: false,
            fault_tolerance: FaultToleranceConfig::default(),
        }
    }
}

impl StepConfig {
    /// Creates a configuration with the given commit interval.
    #[must_use]
    pub fn new(commit_interval: usize) -> Self {
        Self {
            commit_interval,
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the start limit.
    #[must_use]
    pub fn with_start_limit(mut self, limit: u32) -> Self {
        self.start_limit = limit;
        self
    }

    /// Allows re-running a completed step on restart.
    #[must_use]
    pub fn with_allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Enables writing empty chunks.
    #[must_use]
    pub fn with_write_empty_chunks(mut self, enabled: bool) -> Self {
        self.write_empty_chunks = enabled;
        self
    }

    /// Sets the fault tolerance settings.
    #[must_use]
    pub fn with_fault_tolerance(mut self, fault_tolerance: FaultToleranceConfig) -> Self {
        self.fault_tolerance = fault_tolerance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BackoffStrategy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = StepConfig::default();
        assert_eq!(config.commit_interval, 10);
        assert_eq!(config.start_limit, u32::MAX);
        assert_eq!(config.fault_tolerance.retry_limit, 1);
        assert_eq!(config.fault_tolerance.skip_limit, 0);
        assert_eq!(config.fault_tolerance.retryable, vec![ItemErrorKind::TransientIo]);
    }

    #[test]
    fn test_from_json() {
        let config = StepConfig::from_json(
            r#"{
                "commit_interval": 3,
                "start_limit": 2,
                "fault_tolerance": {
                    "retry_limit": 3,
                    "skip_limit": 5,
                    "read_skip_limit": 1,
                    "skippable": ["validation", {"other": "duplicate"}],
                    "backoff": {"strategy": "constant", "base_delay_ms": 5}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.commit_interval, 3);
        assert_eq!(config.start_limit, 2);
        assert!(!config.write_empty_chunks);

        let ft = &config.fault_tolerance;
        assert_eq!(ft.retry_limit, 3);
        assert_eq!(ft.effective_read_skip_limit(), 1);
        assert_eq!(ft.effective_process_skip_limit(), 5);
        assert_eq!(ft.skippable[1], ItemErrorKind::Other("duplicate".to_string()));
        assert_eq!(ft.backoff.strategy, BackoffStrategy::Constant);
    }

    #[test]
    fn test_builders() {
        let config = StepConfig::new(5)
            .with_start_limit(3)
            .with_write_empty_chunks(true)
            .with_fault_tolerance(FaultToleranceConfig::new().with_skip_limit(2));

        assert_eq!(config.commit_interval, 5);
        assert!(config.write_empty_chunks);
        assert_eq!(config.fault_tolerance.effective_write_skip_limit(), 2);
    }
}
