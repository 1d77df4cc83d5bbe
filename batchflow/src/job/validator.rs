//! Job parameter validation before launch.

use crate::domain::JobParameters;
use crate::errors::BatchError;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Checks launch parameters before a job instance is resolved.
pub trait JobParametersValidator: Send + Sync + Debug {
    /// Returns `BatchError::InvalidParameters` if `parameters` are unusable.
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError>;
}

/// Checks required and optional keys.
///
/// Every required key must be present. When optional keys are declared, any
/// key that is neither required nor optional is rejected.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !parameters.contains_key(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::InvalidParameters(format!(
                "missing required keys: {}",
                missing.join(", ")
            )));
        }

        if !self.optional.is_empty() {
            let unknown: Vec<&str> = parameters
                .keys()
                .into_iter()
                .filter(|key| !self.required.contains(*key) && !self.optional.contains(*key))
                .collect();
            if !unknown.is_empty() {
                return Err(BatchError::InvalidParameters(format!(
                    "keys not in required or optional lists: {}",
                    unknown.join(", ")
                )));
            }
        }

        Ok(())
    }
}
