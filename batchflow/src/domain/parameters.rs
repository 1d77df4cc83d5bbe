//! Job parameters and the job key derived from them.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    /// String value.
    String(String),
    /// Integer value.
    Long(i64),
    /// Float value.
    Double(f64),
    /// Timestamp value.
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// A single job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    /// The value.
    pub value: ParameterValue,
    /// Whether the parameter is part of the job instance identity.
    #[serde(default = "default_identifying")]
    pub identifying: bool,
}

fn default_identifying() -> bool {
    true
}

/// The parameter set a job is launched with.
///
/// Identifying parameters distinguish job instances: two launches with the
/// same job name and identifying parameters target the same instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    #[serde(default)]
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, key: impl Into<String>, value: ParameterValue, identifying: bool) -> Self {
        self.parameters
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    /// Adds an identifying string parameter.
    #[must_use]
    pub fn with_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, ParameterValue::String(value.into()), true)
    }

    /// Adds an identifying integer parameter.
    #[must_use]
    pub fn with_long(self, key: impl Into<String>, value: i64) -> Self {
        self.with(key, ParameterValue::Long(value), true)
    }

    /// Adds an identifying float parameter.
    #[must_use]
    pub fn with_double(self, key: impl Into<String>, value: f64) -> Self {
        self.with(key, ParameterValue::Double(value), true)
    }

    /// Adds an identifying timestamp parameter.
    #[must_use]
    pub fn with_date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.with(key, ParameterValue::Date(value), true)
    }

    /// Adds a parameter that does not contribute to the instance identity.
    #[must_use]
    pub fn with_non_identifying(self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.with(key, value, false)
    }

    /// Returns a parameter by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns an integer parameter.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a float parameter.
    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a timestamp parameter.
    #[must_use]
    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if the parameter exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    /// Returns all parameter names in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Returns the identity key of these parameters.
    ///
    /// MD5 hex digest of the identifying parameters rendered as `name=value;`
    /// in name order.
    #[must_use]
    pub fn job_key(&self) -> String {
        let rendered: String = self
            .parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| format!("{k}={};", p.value))
            .collect();
        hex::encode(Md5::digest(rendered.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_typed_getters() {
        let params = JobParameters::new()
            .with_string("input", "orders.csv")
            .with_long("run.id", 3)
            .with_double("threshold", 0.25);

        assert_eq!(params.get_string("input"), Some("orders.csv"));
        assert_eq!(params.get_long("run.id"), Some(3));
        assert_eq!(params.get_double("threshold"), Some(0.25));
        assert_eq!(params.get_long("input"), None);
        assert_eq!(params.keys(), vec!["input", "run.id", "threshold"]);
    }

    #[test]
    fn test_job_key_ignores_insertion_order() {
        let a = JobParameters::new().with_string("a", "1").with_long("b", 2);
        let b = JobParameters::new().with_long("b", 2).with_string("a", "1");
        assert_eq!(a.job_key(), b.job_key());
        assert_eq!(a.job_key().len(), 32);
    }

    #[test]
    fn test_job_key_ignores_non_identifying() {
        let base = JobParameters::new().with_string("input", "orders.csv");
        let with_extra = base
            .clone()
            .with_non_identifying("attempt", ParameterValue::Long(4));

        assert_eq!(base.job_key(), with_extra.job_key());
        assert_ne!(
            base.job_key(),
            JobParameters::new().with_string("input", "other.csv").job_key()
        );
    }

    #[test]
    fn test_empty_parameters_key_is_md5_of_empty_string() {
        assert_eq!(JobParameters::new().job_key(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
