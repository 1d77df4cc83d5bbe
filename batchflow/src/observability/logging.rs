//! Subscriber setup for `tracing` output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines for log shipping.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    #[default]
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level or filter directive (e.g. "info", "batchflow=debug").
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-module levels added on top of `level`.
    pub module_levels: BTreeMap<String, String>,
    /// Include file and line.
    pub include_location: bool,
    /// Include the module path.
    pub include_target: bool,
    /// Include the thread name. Useful with parallel splits.
    pub include_thread: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            module_levels: BTreeMap::new(),
            include_location: false,
            include_target: true,
            include_thread: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the global level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds a per-module level.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.module_levels.insert(module.into(), level.into());
        self
    }

    /// Builds the filter for this configuration.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingInitError> {
        let mut filter =
            EnvFilter::try_new(&self.level).map_err(|e| LoggingInitError::InvalidFilter(e.to_string()))?;
        for (module, level) in &self.module_levels {
            let directive = format!("{module}={level}")
                .parse()
                .map_err(|e: tracing_subscriber::filter::ParseError| {
                    LoggingInitError::InvalidFilter(e.to_string())
                })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingInitError {
    /// The level or a module directive did not parse.
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    /// A global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    Install(String),
}

/// Installs the global `tracing` subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = config.env_filter()?;
    let install = |e: tracing_subscriber::util::TryInitError| LoggingInitError::Install(e.to_string());

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(install)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(install)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(install)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_from_json() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level":"debug","format":"json","module_levels":{"batchflow::step":"trace"}}"#,
        )
        .unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_target);
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_invalid_module_level_rejected() {
        let config = LoggingConfig::default().with_module_level("batchflow", "loud");
        assert!(matches!(
            config.env_filter(),
            Err(LoggingInitError::InvalidFilter(_))
        ));
    }
}
