//! Flows: ordered steps, conditional transitions and parallel splits.

use crate::cancellation::StopToken;
use crate::core::{BatchStatus, ExitStatus};
use crate::domain::{JobInstance, StepExecution};
use crate::errors::{BatchError, JobRestartError};
use crate::events::{types, EventSink};
use crate::repository::JobRepository;
use crate::step::Step;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    /// Continue with the named step of the same flow.
    Step(String),
    /// End the flow successfully.
    End,
    /// End the flow as failed.
    Fail,
    /// End the flow as stopped, restartable from the next step.
    Stop,
}

/// Routes a step's exit code to the next node.
///
/// Patterns match the whole exit code; `*` matches any run of characters and
/// `?` exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pattern: String,
    target: TransitionTarget,
}

impl Transition {
    /// On `pattern`, continue with `step`.
    #[must_use]
    pub fn to(pattern: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: TransitionTarget::Step(step.into()),
        }
    }

    /// On `pattern`, end the flow successfully.
    #[must_use]
    pub fn end(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: TransitionTarget::End,
        }
    }

    /// On `pattern`, fail the flow.
    #[must_use]
    pub fn fail(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: TransitionTarget::Fail,
        }
    }

    /// On `pattern`, stop the flow.
    #[must_use]
    pub fn stop(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: TransitionTarget::Stop,
        }
    }

    /// Returns the pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the target.
    #[must_use]
    pub fn target(&self) -> &TransitionTarget {
        &self.target
    }

    /// Returns true if the pattern matches `exit_code`.
    #[must_use]
    pub fn matches(&self, exit_code: &str) -> bool {
        wildcard_match(self.pattern.as_bytes(), exit_code.as_bytes())
    }
}

fn wildcard_match(pattern: &[u8], value: &[u8]) -> bool {
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(&c) if c == b'?' || c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    v = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Picks the transition for `exit_code`: an exact pattern wins, otherwise
/// the first wildcard pattern that matches.
fn resolve<'a>(transitions: &'a [Transition], exit_code: &str) -> Option<&'a TransitionTarget> {
    transitions
        .iter()
        .find(|t| t.pattern == exit_code)
        .or_else(|| transitions.iter().find(|t| t.matches(exit_code)))
        .map(Transition::target)
}

/// A node of a flow.
#[derive(Debug)]
pub enum FlowNode {
    /// Runs a step, then follows its transitions.
    Step {
        /// The step.
        step: Arc<dyn Step>,
        /// Explicit transitions, checked before the default routing.
        transitions: Vec<Transition>,
    },
    /// Runs several flows concurrently and waits for all of them.
    Split {
        /// Split name.
        name: String,
        /// The branches.
        flows: Vec<Flow>,
    },
}

impl FlowNode {
    fn transitions(&self) -> &[Transition] {
        match self {
            Self::Step { transitions, .. } => transitions,
            Self::Split { .. } => &[],
        }
    }
}

/// An ordered sequence of nodes.
#[derive(Debug)]
pub struct Flow {
    name: String,
    nodes: Vec<FlowNode>,
}

/// Builds a [`Flow`], typically a branch of a split.
#[derive(Debug)]
pub struct FlowBuilder {
    name: String,
    nodes: Vec<FlowNode>,
}

impl FlowBuilder {
    /// Starts a flow called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Appends a step with default routing.
    #[must_use]
    pub fn step(self, step: impl Step + 'static) -> Self {
        self.step_with_transitions(step, Vec::new())
    }

    /// Appends a step with explicit transitions.
    #[must_use]
    pub fn step_with_transitions(mut self, step: impl Step + 'static, transitions: Vec<Transition>) -> Self {
        self.nodes.push(FlowNode::Step {
            step: Arc::new(step),
            transitions,
        });
        self
    }

    /// Appends a split running `flows` concurrently.
    #[must_use]
    pub fn split(mut self, name: impl Into<String>, flows: Vec<Flow>) -> Self {
        self.nodes.push(FlowNode::Split {
            name: name.into(),
            flows,
        });
        self
    }

    /// Finishes the flow.
    #[must_use]
    pub fn build(self) -> Flow {
        Flow {
            name: self.name,
            nodes: self.nodes,
        }
    }
}

/// How a flow, or one node of it, ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlowOutcome {
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// A step failed with an error that aborts the whole job.
    pub fatal: bool,
}

impl FlowOutcome {
    fn new(status: BatchStatus, exit_status: ExitStatus) -> Self {
        Self {
            status,
            exit_status,
            fatal: false,
        }
    }

    fn completed() -> Self {
        Self::new(BatchStatus::Completed, ExitStatus::completed())
    }

    fn stopped() -> Self {
        Self::new(BatchStatus::Stopped, ExitStatus::stopped())
    }
}

/// What every step of one job execution shares.
pub(crate) struct RunContext {
    pub repository: Arc<dyn JobRepository>,
    pub events: Arc<dyn EventSink>,
    pub stop: Arc<StopToken>,
    pub instance: JobInstance,
    pub job_execution_id: Uuid,
    step_executions: Mutex<Vec<StepExecution>>,
}

impl RunContext {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        events: Arc<dyn EventSink>,
        stop: Arc<StopToken>,
        instance: JobInstance,
        job_execution_id: Uuid,
    ) -> Self {
        Self {
            repository,
            events,
            stop,
            instance,
            job_execution_id,
            step_executions: Mutex::new(Vec::new()),
        }
    }

    /// Step executions created so far, in completion order.
    pub fn take_step_executions(&self) -> Vec<StepExecution> {
        std::mem::take(&mut *self.step_executions.lock())
    }
}

impl Flow {
    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the nodes.
    #[must_use]
    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    /// Names of the steps in this flow, splits included.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .flat_map(|node| match node {
                FlowNode::Step { step, .. } => vec![step.name().to_string()],
                FlowNode::Split { flows, .. } => flows.iter().flat_map(Flow::step_names).collect(),
            })
            .collect()
    }

    fn position(&self, step_name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| matches!(node, FlowNode::Step { step, .. } if step.name() == step_name))
    }

    /// Runs the flow to its end.
    ///
    /// Without a matching transition, a completed node continues with the
    /// next one and anything else ends the flow with that node's status.
    pub(crate) fn run<'a>(&'a self, ctx: &'a Arc<RunContext>) -> BoxFuture<'a, Result<FlowOutcome, BatchError>> {
        async move {
            let mut index = 0;
            let mut last = FlowOutcome::completed();

            while let Some(node) = self.nodes.get(index) {
                let outcome = match node {
                    FlowNode::Step { step, .. } => handle_step(ctx, step).await?,
                    FlowNode::Split { name, flows } => run_split(ctx, name, flows).await?,
                };
                if outcome.fatal {
                    return Ok(outcome);
                }

                match resolve(node.transitions(), &outcome.exit_status.exit_code) {
                    Some(TransitionTarget::Step(target)) => {
                        index = self.position(target).ok_or_else(|| {
                            BatchError::Internal(format!(
                                "Flow '{}' has no step '{target}'",
                                self.name
                            ))
                        })?;
                    }
                    Some(TransitionTarget::End) => return Ok(FlowOutcome::completed()),
                    Some(TransitionTarget::Fail) => {
                        return Ok(FlowOutcome::new(
                            BatchStatus::Failed,
                            ExitStatus::failed().with_description(format!(
                                "Transition on exit code {} failed the flow",
                                outcome.exit_status.exit_code
                            )),
                        ))
                    }
                    Some(TransitionTarget::Stop) => return Ok(FlowOutcome::stopped()),
                    None if outcome.status == BatchStatus::Completed => {
                        index += 1;
                        last = outcome;
                    }
                    None => return Ok(outcome),
                }
            }

            Ok(last)
        }
        .boxed()
    }
}

async fn run_split(ctx: &Arc<RunContext>, name: &str, flows: &[Flow]) -> Result<FlowOutcome, BatchError> {
    info!(split = %name, branches = flows.len(), "Running split");
    let results = join_all(flows.iter().map(|flow| flow.run(ctx))).await;

    let mut aggregate: Option<FlowOutcome> = None;
    for result in results {
        let outcome = result?;
        aggregate = Some(match aggregate {
            None => outcome,
            Some(acc) => FlowOutcome {
                status: acc.status.max(outcome.status),
                exit_status: acc.exit_status.and(outcome.exit_status),
                fatal: acc.fatal || outcome.fatal,
            },
        });
    }
    Ok(aggregate.unwrap_or_else(FlowOutcome::completed))
}

/// Decides whether the step runs, prepares its execution and runs it on a
/// blocking worker.
async fn handle_step(ctx: &Arc<RunContext>, step: &Arc<dyn Step>) -> Result<FlowOutcome, BatchError> {
    let name = step.name().to_string();
    if ctx.stop.is_stop_requested() {
        info!(step = %name, "Stop requested, not starting step");
        return Ok(FlowOutcome::stopped());
    }

    let last = ctx.repository.get_last_step_execution(&ctx.instance, &name)?;
    if let Some(last) = &last {
        match last.status() {
            BatchStatus::Completed if !step.allow_start_if_complete() => {
                info!(step = %name, "Step already complete, not re-running");
                ctx.events.try_emit(
                    types::STEP_SKIPPED,
                    Some(json!({ "step": name, "reason": "complete" })),
                );
                return Ok(FlowOutcome::new(BatchStatus::Completed, last.exit_status.clone()));
            }
            BatchStatus::Abandoned => {
                info!(step = %name, "Step abandoned, not re-running");
                ctx.events.try_emit(
                    types::STEP_SKIPPED,
                    Some(json!({ "step": name, "reason": "abandoned" })),
                );
                return Ok(FlowOutcome::new(BatchStatus::Completed, ExitStatus::noop()));
            }
            BatchStatus::Unknown => {
                return Err(JobRestartError::IllegalStatus {
                    job: ctx.instance.job_name.clone(),
                    status: BatchStatus::Unknown,
                }
                .into());
            }
            _ => {}
        }
    }

    let starts = ctx.repository.get_step_execution_count(&ctx.instance, &name)?;
    if starts >= step.start_limit() {
        warn!(step = %name, starts, limit = step.start_limit(), "Start limit exceeded");
        return Err(JobRestartError::StartLimitExceeded {
            step: name,
            limit: step.start_limit(),
        }
        .into());
    }

    let mut execution = StepExecution::new(name.as_str(), ctx.job_execution_id);
    if let Some(last) = last.filter(|l| l.status() != BatchStatus::Completed) {
        info!(step = %name, previous = %last.id, "Resuming step from its last checkpoint");
        execution.execution_context = last.execution_context.resume();
    }
    ctx.repository.add_step_execution(&execution)?;

    let worker_step = Arc::clone(step);
    let stop = Arc::clone(&ctx.stop);
    let (execution, result) = tokio::task::spawn_blocking(move || {
        let result = worker_step.execute(&mut execution, &stop);
        (execution, result)
    })
    .await
    .map_err(|e| BatchError::Internal(format!("Step '{name}' worker panicked: {e}")))?;

    let outcome = FlowOutcome {
        status: execution.status(),
        exit_status: execution.exit_status.clone(),
        fatal: execution.has_fatal_failure(),
    };
    ctx.step_executions.lock().push(execution);
    result?;
    Ok(outcome)
}
