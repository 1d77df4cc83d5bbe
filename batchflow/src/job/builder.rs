//! Job builder with topology validation.

use super::flow::{Flow, FlowBuilder, FlowNode, Transition, TransitionTarget};
use super::flow_job::Job;
use super::validator::JobParametersValidator;
use crate::errors::{ErrorInfo, JobValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::repository::JobRepository;
use crate::step::Step;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for validated jobs.
pub struct JobBuilder {
    name: String,
    repository: Arc<dyn JobRepository>,
    events: Arc<dyn EventSink>,
    restartable: bool,
    validator: Option<Arc<dyn JobParametersValidator>>,
    flow: FlowBuilder,
}

impl JobBuilder {
    /// Creates a builder for the job `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, repository: Arc<dyn JobRepository>) -> Self {
        let name = name.into();
        Self {
            flow: FlowBuilder::new(name.clone()),
            name,
            repository,
            events: Arc::new(NoOpEventSink),
            restartable: true,
            validator: None,
        }
    }

    /// Appends a step. It runs when the previous node completes.
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.flow = self.flow.step(step);
        self
    }

    /// Appends a step whose exit code is routed by `transitions` first.
    #[must_use]
    pub fn step_with_transitions(mut self, step: impl Step + 'static, transitions: Vec<Transition>) -> Self {
        self.flow = self.flow.step_with_transitions(step, transitions);
        self
    }

    /// Appends a split running `flows` concurrently.
    #[must_use]
    pub fn split(mut self, name: impl Into<String>, flows: Vec<Flow>) -> Self {
        self.flow = self.flow.split(name, flows);
        self
    }

    /// Sets whether failed or stopped executions may be restarted.
    #[must_use]
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Sets the event sink for job events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the parameter validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn JobParametersValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Builds the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job has no steps, a step name is used twice,
    /// or a transition names a step outside its flow.
    pub fn build(self) -> Result<Job, JobValidationError> {
        let flow = self.flow.build();

        let names = flow.step_names();
        if names.is_empty() {
            return Err(JobValidationError::new(format!("Job '{}' has no steps", self.name))
                .with_error_info(
                    ErrorInfo::new("JOB-001-EMPTY", "Cannot build a job without steps")
                        .with_fix_hint("Add at least one step before building."),
                ));
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(JobValidationError::new(format!(
                    "Job '{}' declares step '{name}' more than once",
                    self.name
                ))
                .with_steps(vec![name.clone()])
                .with_error_info(
                    ErrorInfo::new("JOB-002-DUPLICATE_STEP", format!("Step name '{name}' is not unique"))
                        .with_fix_hint("Step names identify restart state and must be unique within a job."),
                ));
            }
        }

        validate_transitions(&flow)?;

        Ok(Job {
            name: self.name,
            flow,
            restartable: self.restartable,
            repository: self.repository,
            events: self.events,
            validator: self.validator,
        })
    }
}

fn validate_transitions(flow: &Flow) -> Result<(), JobValidationError> {
    let local: HashSet<&str> = flow
        .nodes()
        .iter()
        .filter_map(|node| match node {
            FlowNode::Step { step, .. } => Some(step.name()),
            FlowNode::Split { .. } => None,
        })
        .collect();

    for node in flow.nodes() {
        match node {
            FlowNode::Step { step, transitions } => {
                for transition in transitions {
                    if let TransitionTarget::Step(target) = transition.target() {
                        if !local.contains(target.as_str()) {
                            return Err(JobValidationError::new(format!(
                                "Step '{}' transitions to unknown step '{target}'",
                                step.name()
                            ))
                            .with_steps(vec![step.name().to_string(), target.clone()])
                            .with_error_info(
                                ErrorInfo::new(
                                    "JOB-003-UNKNOWN_TARGET",
                                    format!("Transition target '{target}' not found in flow '{}'", flow.name()),
                                )
                                .with_context_entry("pattern", transition.pattern())
                                .with_fix_hint("Transitions can only reach steps of the same flow."),
                            ));
                        }
                    }
                }
            }
            FlowNode::Split { flows, .. } => {
                for branch in flows {
                    validate_transitions(branch)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryJobRepository;
    use crate::step::{ChunkContext, RepeatStatus, StepBuilder, Tasklet, TaskletStep};
    use crate::domain::StepContribution;
    use crate::errors::BatchError;
    use pretty_assertions::assert_eq;

    struct Done;

    impl Tasklet for Done {
        fn execute(
            &self,
            _contribution: &mut StepContribution,
            _chunk_context: &mut ChunkContext<'_, '_>,
        ) -> Result<RepeatStatus, BatchError> {
            Ok(RepeatStatus::Finished)
        }
    }

    fn step(repository: &Arc<InMemoryJobRepository>, name: &str) -> TaskletStep {
        StepBuilder::new(name, repository.clone()).tasklet(Arc::new(Done))
    }

    #[test]
    fn test_rejects_empty_job() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let err = JobBuilder::new("job", repository).build().unwrap_err();
        assert_eq!(err.code(), Some("JOB-001-EMPTY"));
    }

    #[test]
    fn test_rejects_duplicate_step_across_split() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let branch = FlowBuilder::new("branch").step(step(&repository, "load")).build();
        let err = JobBuilder::new("job", repository.clone())
            .step(step(&repository, "load"))
            .split("parallel", vec![branch])
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("JOB-002-DUPLICATE_STEP"));
        assert_eq!(err.steps, vec!["load".to_string()]);
    }

    #[test]
    fn test_rejects_unknown_transition_target() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let err = JobBuilder::new("job", repository.clone())
            .step_with_transitions(step(&repository, "load"), vec![Transition::to("FAILED", "cleanup")])
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("JOB-003-UNKNOWN_TARGET"));
    }

    #[test]
    fn test_builds_valid_job() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let job = JobBuilder::new("job", repository.clone())
            .step_with_transitions(
                step(&repository, "load"),
                vec![Transition::to("FAILED", "cleanup"), Transition::to("*", "report")],
            )
            .step(step(&repository, "cleanup"))
            .step(step(&repository, "report"))
            .restartable(false)
            .build()
            .unwrap();

        assert_eq!(job.name(), "job");
        assert!(!job.is_restartable());
        assert_eq!(job.step_names(), vec!["load", "cleanup", "report"]);
    }
}
