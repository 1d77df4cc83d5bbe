//! In-memory job repository.

use super::JobRepository;
use crate::context::ExecutionContext;
use crate::domain::{JobExecution, JobInstance, JobParameters, StepExecution};
use crate::errors::RepositoryError;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    instances: HashMap<(String, String), JobInstance>,
    /// Job executions without their steps or context.
    job_executions: HashMap<Uuid, JobExecution>,
    executions_by_instance: HashMap<Uuid, Vec<Uuid>>,
    /// Step executions without their context.
    step_executions: HashMap<Uuid, StepExecution>,
    steps_by_job_execution: HashMap<Uuid, Vec<Uuid>>,
    /// Contexts in their JSON wire form, keyed by owning execution id.
    contexts: HashMap<Uuid, String>,
}

impl State {
    fn load_context(&self, owner: Uuid) -> Result<ExecutionContext, RepositoryError> {
        self.contexts.get(&owner).map_or_else(
            || Ok(ExecutionContext::new()),
            |json| {
                ExecutionContext::from_json(json)
                    .map_err(|e| RepositoryError::Serialization(e.to_string()))
            },
        )
    }

    fn load_step(&self, id: Uuid) -> Result<Option<StepExecution>, RepositoryError> {
        let Some(stored) = self.step_executions.get(&id) else {
            return Ok(None);
        };
        let mut step = stored.clone();
        step.execution_context = self.load_context(id)?;
        Ok(Some(step))
    }

    fn load_job(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError> {
        let Some(stored) = self.job_executions.get(&id) else {
            return Ok(None);
        };
        let mut execution = stored.clone();
        execution.execution_context = self.load_context(id)?;
        execution.step_executions = self
            .steps_by_job_execution
            .get(&id)
            .into_iter()
            .flatten()
            .map(|step_id| self.load_step(*step_id))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        Ok(Some(execution))
    }

    fn instance_executions(&self, instance: &JobInstance) -> &[Uuid] {
        self.executions_by_instance
            .get(&instance.id)
            .map_or(&[], Vec::as_slice)
    }

    fn instance_steps<'a>(
        &'a self,
        instance: &JobInstance,
        step_name: &'a str,
    ) -> impl Iterator<Item = &'a StepExecution> + 'a {
        let executions: Vec<Uuid> = self.instance_executions(instance).to_vec();
        executions
            .into_iter()
            .filter_map(move |job_id| self.steps_by_job_execution.get(&job_id))
            .flatten()
            .filter_map(move |step_id| self.step_executions.get(step_id))
            .filter(move |step| step.step_name == step_name)
    }

    fn store_context(&mut self, owner: Uuid, context: &ExecutionContext) -> Result<(), RepositoryError> {
        let json = context
            .to_json()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.contexts.insert(owner, json);
        Ok(())
    }
}

/// Job repository backed by process memory.
///
/// Execution contexts are stored in their JSON wire form, so every load
/// returns an independent snapshot.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: RwLock<State>,
}

impl InMemoryJobRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of job instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.state.read().instances.len()
    }

    /// Returns the number of job executions.
    #[must_use]
    pub fn job_execution_count(&self) -> usize {
        self.state.read().job_executions.len()
    }

    /// Removes all records.
    pub fn clear(&self) {
        *self.state.write() = State::default();
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_or_create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        let key = (job_name.to_string(), parameters.job_key());
        let mut state = self.state.write();
        let instance = state
            .instances
            .entry(key)
            .or_insert_with(|| JobInstance::new(job_name, parameters))
            .clone();
        Ok(instance)
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let key = (job_name.to_string(), parameters.job_key());
        Ok(self.state.read().instances.get(&key).cloned())
    }

    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError> {
        let mut state = self.state.write();

        let running = state
            .instance_executions(instance)
            .iter()
            .filter_map(|id| state.job_executions.get(id))
            .find(|e| e.is_running())
            .map(|e| e.id);
        if let Some(id) = running {
            return Err(RepositoryError::Conflict(format!(
                "job execution {id} of '{}' is still running",
                instance.job_name
            )));
        }

        let mut execution = JobExecution::new(instance.clone(), parameters.clone());
        execution.last_updated = Some(Utc::now());

        state.job_executions.insert(execution.id, execution.clone());
        state
            .executions_by_instance
            .entry(instance.id)
            .or_default()
            .push(execution.id);
        state.store_context(execution.id, &execution.execution_context)?;

        debug!(job = %instance.job_name, execution_id = %execution.id, "Created job execution");
        Ok(execution)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.job_executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound(format!("job execution {}", execution.id)));
        }
        let mut stored = execution.clone();
        stored.step_executions.clear();
        stored.execution_context = ExecutionContext::new();
        stored.last_updated = Some(Utc::now());
        state.job_executions.insert(execution.id, stored);
        Ok(())
    }

    fn update_job_execution_context(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.job_executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound(format!("job execution {}", execution.id)));
        }
        state.store_context(execution.id, &execution.execution_context)
    }

    fn get_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError> {
        self.state.read().load_job(id)
    }

    fn get_last_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let state = self.state.read();
        match state.instance_executions(instance).last() {
            Some(id) => state.load_job(*id),
            None => Ok(None),
        }
    }

    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, RepositoryError> {
        let state = self.state.read();
        let ids: Vec<Uuid> = state
            .job_executions
            .values()
            .filter(|e| e.job_name() == job_name && e.is_running())
            .map(|e| e.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| state.load_job(id).transpose())
            .collect()
    }

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.job_executions.contains_key(&step_execution.job_execution_id) {
            return Err(RepositoryError::NotFound(format!(
                "job execution {}",
                step_execution.job_execution_id
            )));
        }
        if state.step_executions.contains_key(&step_execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "step execution {} already registered",
                step_execution.id
            )));
        }

        let mut stored = step_execution.clone();
        stored.execution_context = ExecutionContext::new();
        stored.last_updated = Some(Utc::now());
        state.step_executions.insert(step_execution.id, stored);
        state
            .steps_by_job_execution
            .entry(step_execution.job_execution_id)
            .or_default()
            .push(step_execution.id);
        state.store_context(step_execution.id, &step_execution.execution_context)
    }

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.step_executions.contains_key(&step_execution.id) {
            return Err(RepositoryError::NotFound(format!(
                "step execution {}",
                step_execution.id
            )));
        }
        let mut stored = step_execution.clone();
        stored.execution_context = ExecutionContext::new();
        stored.last_updated = Some(Utc::now());
        state.step_executions.insert(step_execution.id, stored);
        Ok(())
    }

    fn update_execution_context(&self, step_execution: &StepExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.step_executions.contains_key(&step_execution.id) {
            return Err(RepositoryError::NotFound(format!(
                "step execution {}",
                step_execution.id
            )));
        }
        state.store_context(step_execution.id, &step_execution.execution_context)
    }

    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let state = self.state.read();
        let last = state
            .instance_steps(instance, step_name)
            .last()
            .map(|step| step.id);
        match last {
            Some(id) => state.load_step(id),
            None => Ok(None),
        }
    }

    fn get_step_execution_count(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<u32, RepositoryError> {
        let state = self.state.read();
        let count = state.instance_steps(instance, step_name).count();
        u32::try_from(count).map_err(|e| RepositoryError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BatchStatus;
    use pretty_assertions::assert_eq;

    fn params() -> JobParameters {
        JobParameters::new().with_string("input", "orders.csv")
    }

    #[test]
    fn test_instance_is_reused_for_same_parameters() {
        let repo = InMemoryJobRepository::new();
        let a = repo.get_or_create_job_instance("import", &params()).unwrap();
        let b = repo.get_or_create_job_instance("import", &params()).unwrap();
        let c = repo
            .get_or_create_job_instance("import", &JobParameters::new().with_string("input", "x"))
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(repo.instance_count(), 2);
        assert_eq!(repo.get_job_instance("import", &params()).unwrap(), Some(a));
    }

    #[test]
    fn test_only_one_running_execution_per_instance() {
        let repo = InMemoryJobRepository::new();
        let instance = repo.get_or_create_job_instance("import", &params()).unwrap();
        let mut first = repo.create_job_execution(&instance, &params()).unwrap();

        let err = repo.create_job_execution(&instance, &params()).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        first.status = BatchStatus::Failed;
        first.end_time = Some(Utc::now());
        repo.update_job_execution(&first).unwrap();

        let second = repo.create_job_execution(&instance, &params()).unwrap();
        let last = repo.get_last_job_execution(&instance).unwrap().unwrap();
        assert_eq!(last.id, second.id);
    }

    #[test]
    fn test_step_context_round_trip() {
        let repo = InMemoryJobRepository::new();
        let instance = repo.get_or_create_job_instance("import", &params()).unwrap();
        let job = repo.create_job_execution(&instance, &params()).unwrap();

        let mut step = StepExecution::new("load", job.id);
        repo.add_step_execution(&step).unwrap();

        step.execution_context.put_long("reader.read.count", 6);
        step.write_count = 6;
        repo.update_step_execution(&step).unwrap();
        repo.update_execution_context(&step).unwrap();

        let loaded = repo.get_last_step_execution(&instance, "load").unwrap().unwrap();
        assert_eq!(loaded.write_count, 6);
        assert_eq!(loaded.execution_context.get_long("reader.read.count"), Some(6));

        let job = repo.get_job_execution(job.id).unwrap().unwrap();
        assert_eq!(job.step_executions.len(), 1);
    }

    #[test]
    fn test_counters_without_context_update_keep_old_context() {
        let repo = InMemoryJobRepository::new();
        let instance = repo.get_or_create_job_instance("import", &params()).unwrap();
        let job = repo.create_job_execution(&instance, &params()).unwrap();
        let mut step = StepExecution::new("load", job.id);
        repo.add_step_execution(&step).unwrap();

        step.execution_context.put_long("reader.read.count", 3);
        repo.update_step_execution(&step).unwrap();

        let loaded = repo.get_last_step_execution(&instance, "load").unwrap().unwrap();
        assert!(loaded.execution_context.is_empty());
    }

    #[test]
    fn test_step_execution_count_spans_job_executions() {
        let repo = InMemoryJobRepository::new();
        let instance = repo.get_or_create_job_instance("import", &params()).unwrap();

        for _ in 0..2 {
            let mut job = repo.create_job_execution(&instance, &params()).unwrap();
            repo.add_step_execution(&StepExecution::new("load", job.id)).unwrap();
            job.status = BatchStatus::Failed;
            job.end_time = Some(Utc::now());
            repo.update_job_execution(&job).unwrap();
        }

        assert_eq!(repo.get_step_execution_count(&instance, "load").unwrap(), 2);
        assert_eq!(repo.get_step_execution_count(&instance, "other").unwrap(), 0);
    }

    #[test]
    fn test_update_unknown_step_is_not_found() {
        let repo = InMemoryJobRepository::new();
        let step = StepExecution::new("load", Uuid::now_v7());
        assert!(matches!(
            repo.update_step_execution(&step),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
