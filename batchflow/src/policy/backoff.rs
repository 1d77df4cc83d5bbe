//! Backoff between retry attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows with each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base
    Constant,
}

/// Randomization applied to the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Backoff configuration.
///
/// The default has a zero base delay, so retries run back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Growth strategy.
    pub strategy: BackoffStrategy,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 0,
            max_delay_ms: 30_000,
            jitter: JitterStrategy::None,
        }
    }
}

impl BackoffConfig {
    /// No delay between attempts.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// The same delay before every retry.
    #[must_use]
    pub fn constant(delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Constant,
            base_delay_ms: delay_ms,
            ..Self::default()
        }
    }

    /// A delay that grows by `base_ms` per attempt.
    #[must_use]
    pub fn linear(base_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base_delay_ms: base_ms,
            ..Self::default()
        }
    }

    /// A delay that doubles per attempt.
    #[must_use]
    pub fn exponential(base_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: base_ms,
            ..Self::default()
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the delay to wait after `attempt` failed attempts.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let attempt = attempt.max(1);

        let delay = match self.strategy {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(attempt - 1))
                .min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt)).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Blocks the current worker for the delay after `attempt`.
    pub fn pause(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
