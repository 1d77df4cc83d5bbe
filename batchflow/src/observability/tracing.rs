//! Span attributes and timing for step executions.

use crate::domain::StepExecution;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Span attributes describing a finished step execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpanAttributes {
    /// Step name.
    pub step_name: String,
    /// Job execution id.
    pub job_execution_id: Option<String>,
    /// Final status.
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Items read.
    pub read_count: u64,
    /// Items written.
    pub write_count: u64,
    /// Items skipped.
    pub skip_count: u64,
    /// Chunks committed.
    pub commit_count: u64,
    /// Rollbacks.
    pub rollback_count: u64,
    /// Error message if failed.
    pub error: Option<String>,
}

impl StepSpanAttributes {
    /// Creates empty attributes for a step.
    #[must_use]
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Default::default()
        }
    }

    /// Captures status and counters of a step execution.
    #[must_use]
    pub fn from_execution(execution: &StepExecution) -> Self {
        Self {
            step_name: execution.step_name.clone(),
            job_execution_id: Some(execution.job_execution_id.to_string()),
            status: Some(execution.status().to_string()),
            duration_ms: None,
            read_count: execution.read_count,
            write_count: execution.write_count,
            skip_count: execution.skip_count(),
            commit_count: execution.commit_count,
            rollback_count: execution.rollback_count,
            error: execution.failures.last().map(|f| f.error.clone()),
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Converts to flat OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        attrs.insert("step.name".to_string(), self.step_name.clone());
        if let Some(ref v) = self.job_execution_id {
            attrs.insert("job.execution_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.status {
            attrs.insert("step.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("step.duration_ms".to_string(), v.to_string());
        }
        attrs.insert("step.read_count".to_string(), self.read_count.to_string());
        attrs.insert("step.write_count".to_string(), self.write_count.to_string());
        attrs.insert("step.skip_count".to_string(), self.skip_count.to_string());
        attrs.insert("step.commit_count".to_string(), self.commit_count.to_string());
        attrs.insert("step.rollback_count".to_string(), self.rollback_count.to_string());
        if let Some(ref v) = self.error {
            attrs.insert("step.error".to_string(), v.clone());
        }

        attrs
    }

    /// Converts to an event payload.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_attributes_from_execution() {
        let mut execution = StepExecution::new("load", Uuid::now_v7());
        execution.read_count = 10;
        execution.write_count = 9;
        execution.process_skip_count = 1;

        let attrs = StepSpanAttributes::from_execution(&execution)
            .with_duration_ms(12.5)
            .to_otel_attributes();

        assert_eq!(attrs.get("step.name"), Some(&"load".to_string()));
        assert_eq!(attrs.get("step.status"), Some(&"STARTING".to_string()));
        assert_eq!(attrs.get("step.skip_count"), Some(&"1".to_string()));
        assert_eq!(attrs.get("step.duration_ms"), Some(&"12.5".to_string()));
        assert!(!attrs.contains_key("step.error"));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("chunk");
        assert_eq!(timer.name(), "chunk");
        assert!(timer.finish() >= 0.0);
    }
}
