//! Step builders with validation.

use super::chunk::{ChunkOrientedTasklet, FaultTolerance};
use super::tasklet::Tasklet;
use super::tasklet_step::TaskletStep;
use crate::config::{FaultToleranceConfig, StepConfig};
use crate::errors::{ErrorInfo, ItemErrorKind, JobValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::item::{ItemProcessor, ItemReader, ItemWriter, PassThroughItemProcessor};
use crate::policy::{
    BackoffConfig, ErrorClassifier, LimitCheckingSkipPolicy, RetryPolicy, RetryTemplate,
    SimpleRetryPolicy, SkipPolicy,
};
use crate::repository::JobRepository;
use crate::transaction::{ResourcelessTransactionManager, TransactionManager};
use std::sync::Arc;

/// Builder for steps.
///
/// Holds what every step needs: a name, the repository and the transaction
/// manager. Finish with [`tasklet`](Self::tasklet) or continue with
/// [`chunk`](Self::chunk).
pub struct StepBuilder {
    name: String,
    repository: Arc<dyn JobRepository>,
    transaction_manager: Arc<dyn TransactionManager>,
    events: Arc<dyn EventSink>,
    start_limit: u32,
    allow_start_if_complete: bool,
}

impl StepBuilder {
    /// Creates a builder for the step `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            name: name.into(),
            repository,
            transaction_manager: Arc::new(ResourcelessTransactionManager::new()),
            events: Arc::new(NoOpEventSink),
            start_limit: u32::MAX,
            allow_start_if_complete: false,
        }
    }

    /// Sets the transaction manager.
    #[must_use]
    pub fn with_transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = manager;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Limits how many times the step may be started for one job instance.
    #[must_use]
    pub fn start_limit(mut self, limit: u32) -> Self {
        self.start_limit = limit;
        self
    }

    /// Re-runs the step on restart even if it completed before.
    #[must_use]
    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Builds a step around a custom tasklet.
    #[must_use]
    pub fn tasklet(self, tasklet: Arc<dyn Tasklet>) -> TaskletStep {
        TaskletStep::new(self.name, tasklet, self.repository, self.transaction_manager)
            .with_events(self.events)
            .with_start_limit(self.start_limit)
            .with_allow_start_if_complete(self.allow_start_if_complete)
    }

    /// Continues with a chunk-oriented step of `commit_interval` items per
    /// transaction. Items pass through unchanged until a processor is set.
    #[must_use]
    pub fn chunk<T>(self, commit_interval: usize) -> ChunkStepBuilder<T, T>
    where
        T: Clone + Send + 'static,
    {
        ChunkStepBuilder {
            step: self,
            commit_interval,
            reader: None,
            processor: Some(Box::new(PassThroughItemProcessor)),
            writer: None,
            fault_tolerance: FaultToleranceConfig::default(),
            retry_policy: None,
            skip_policy: None,
            write_empty_chunks: false,
        }
    }

    /// Continues with a chunk-oriented step configured from `config`.
    #[must_use]
    pub fn from_config<T>(self, config: &StepConfig) -> ChunkStepBuilder<T, T>
    where
        T: Clone + Send + 'static,
    {
        self.start_limit(config.start_limit)
            .allow_start_if_complete(config.allow_start_if_complete)
            .chunk(config.commit_interval)
            .write_empty_chunks(config.write_empty_chunks)
            .fault_tolerance(config.fault_tolerance.clone())
    }
}

/// Builder for chunk-oriented steps reading `I` and writing `O`.
///
/// Set the processor before the writer: changing the output type discards a
/// writer set earlier.
pub struct ChunkStepBuilder<I, O> {
    step: StepBuilder,
    commit_interval: usize,
    reader: Option<Box<dyn ItemReader<I>>>,
    processor: Option<Box<dyn ItemProcessor<I, O>>>,
    writer: Option<Box<dyn ItemWriter<O>>>,
    fault_tolerance: FaultToleranceConfig,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    skip_policy: Option<Arc<dyn SkipPolicy>>,
    write_empty_chunks: bool,
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Sets the reader.
    #[must_use]
    pub fn reader(mut self, reader: impl ItemReader<I> + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Sets the processor.
    #[must_use]
    pub fn processor<P>(self, processor: impl ItemProcessor<I, P> + 'static) -> ChunkStepBuilder<I, P> {
        ChunkStepBuilder {
            step: self.step,
            commit_interval: self.commit_interval,
            reader: self.reader,
            processor: Some(Box::new(processor)),
            writer: None,
            fault_tolerance: self.fault_tolerance,
            retry_policy: self.retry_policy,
            skip_policy: self.skip_policy,
            write_empty_chunks: self.write_empty_chunks,
        }
    }

    /// Sets the writer.
    #[must_use]
    pub fn writer(mut self, writer: impl ItemWriter<O> + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Sets attempts per item operation, including the first.
    #[must_use]
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.fault_tolerance.retry_limit = limit;
        self
    }

    /// Sets the error kinds worth retrying.
    #[must_use]
    pub fn retryable(mut self, kinds: impl IntoIterator<Item = ItemErrorKind>) -> Self {
        self.fault_tolerance.retryable = kinds.into_iter().collect();
        self
    }

    /// Sets the total skip limit.
    #[must_use]
    pub fn skip_limit(mut self, limit: u64) -> Self {
        self.fault_tolerance.skip_limit = limit;
        self
    }

    /// Sets the error kinds that may be skipped.
    #[must_use]
    pub fn skippable(mut self, kinds: impl IntoIterator<Item = ItemErrorKind>) -> Self {
        self.fault_tolerance.skippable = kinds.into_iter().collect();
        self
    }

    /// Bounds read skips separately.
    #[must_use]
    pub fn read_skip_limit(mut self, limit: u64) -> Self {
        self.fault_tolerance.read_skip_limit = Some(limit);
        self
    }

    /// Bounds process skips separately.
    #[must_use]
    pub fn process_skip_limit(mut self, limit: u64) -> Self {
        self.fault_tolerance.process_skip_limit = Some(limit);
        self
    }

    /// Bounds write skips separately.
    #[must_use]
    pub fn write_skip_limit(mut self, limit: u64) -> Self {
        self.fault_tolerance.write_skip_limit = Some(limit);
        self
    }

    /// Replaces the retry policy built from the retry settings.
    #[must_use]
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replaces the skip policies of all phases. No total cap applies.
    #[must_use]
    pub fn skip_policy(mut self, policy: Arc<dyn SkipPolicy>) -> Self {
        self.skip_policy = Some(policy);
        self
    }

    /// Sets the delay between retries.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.fault_tolerance.backoff = backoff;
        self
    }

    /// Calls the writer even for chunks whose items were all skipped or filtered.
    #[must_use]
    pub fn write_empty_chunks(mut self, enabled: bool) -> Self {
        self.write_empty_chunks = enabled;
        self
    }

    /// Replaces all retry and skip settings.
    #[must_use]
    pub fn fault_tolerance(mut self, config: FaultToleranceConfig) -> Self {
        self.fault_tolerance = config;
        self
    }

    /// Builds the step.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit interval is zero, the reader or writer
    /// is missing, or the retry limit is zero.
    pub fn build(self) -> Result<TaskletStep, JobValidationError> {
        let name = self.step.name.clone();

        if self.commit_interval == 0 {
            return Err(JobValidationError::new(format!(
                "Step '{name}' has a commit interval of zero"
            ))
            .with_steps(vec![name])
            .with_error_info(
                ErrorInfo::new("STEP-001-COMMIT_INTERVAL", "Commit interval must be at least 1")
                    .with_fix_hint("Pass a positive item count to chunk()."),
            ));
        }

        let Some(reader) = self.reader else {
            return Err(missing_component(&name, "reader"));
        };
        let Some(processor) = self.processor else {
            return Err(missing_component(&name, "processor"));
        };
        let Some(writer) = self.writer else {
            return Err(missing_component(&name, "writer"));
        };

        if self.retry_policy.is_none() && self.fault_tolerance.retry_limit == 0 {
            return Err(JobValidationError::new(format!("Step '{name}' has a retry limit of zero"))
                .with_steps(vec![name])
                .with_error_info(
                    ErrorInfo::new("STEP-003-RETRY_LIMIT", "Retry limit counts the first attempt")
                        .with_fix_hint("Use 1 to disable retries."),
                ));
        }

        let fault_tolerance = build_fault_tolerance(&self.fault_tolerance, self.retry_policy, self.skip_policy);
        let tasklet = ChunkOrientedTasklet::new(reader, processor, writer, self.commit_interval)
            .with_fault_tolerance(fault_tolerance)
            .with_write_empty_chunks(self.write_empty_chunks)
            .with_events(Arc::clone(&self.step.events));

        Ok(self.step.tasklet(Arc::new(tasklet)))
    }
}

fn missing_component(step: &str, component: &str) -> JobValidationError {
    JobValidationError::new(format!("Step '{step}' has no {component}"))
        .with_steps(vec![step.to_string()])
        .with_error_info(
            ErrorInfo::new("STEP-002-MISSING_COMPONENT", format!("A chunk step needs a {component}"))
                .with_context_entry("component", component)
                .with_fix_hint("Set the reader, then the processor if any, then the writer."),
        )
}

fn build_fault_tolerance(
    config: &FaultToleranceConfig,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    skip_policy: Option<Arc<dyn SkipPolicy>>,
) -> FaultTolerance {
    let retry_policy = retry_policy.unwrap_or_else(|| {
        Arc::new(SimpleRetryPolicy::with_classifier(
            config.retry_limit,
            ErrorClassifier::of(config.retryable.iter().cloned()),
        ))
    });
    let retry = RetryTemplate::new(retry_policy, config.backoff.clone());

    if let Some(policy) = skip_policy {
        return FaultTolerance {
            retry,
            read_skip: Arc::clone(&policy),
            process_skip: Arc::clone(&policy),
            write_skip: policy,
            skip_limit: None,
        };
    }

    let phase_policy = |limit: u64| -> Arc<dyn SkipPolicy> {
        Arc::new(LimitCheckingSkipPolicy::with_classifier(
            limit,
            ErrorClassifier::of(config.skippable.iter().cloned()),
        ))
    };
    let per_phase = config.read_skip_limit.is_some()
        || config.process_skip_limit.is_some()
        || config.write_skip_limit.is_some();

    FaultTolerance {
        retry,
        read_skip: phase_policy(config.effective_read_skip_limit()),
        process_skip: phase_policy(config.effective_process_skip_limit()),
        write_skip: phase_policy(config.effective_write_skip_limit()),
        skip_limit: (config.skip_limit > 0 || !per_phase).then_some(config.skip_limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::StopToken;
    use crate::context::ExecutionContext;
    use crate::core::BatchStatus;
    use crate::domain::{JobParameters, StepExecution};
    use crate::errors::ItemError;
    use crate::item::{Chunk, FnItemProcessor, ItemStream, ListItemReader, ListItemWriter};
    use crate::repository::InMemoryJobRepository;
    use crate::step::Step;
    use crate::testing::{FailingItemWriter, ScriptedReader};
    use mockall::mock;
    use pretty_assertions::assert_eq;

    mock! {
        Writer {}

        impl ItemStream for Writer {
            fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError>;
            fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError>;
            fn close(&mut self) -> Result<(), ItemError>;
        }

        impl ItemWriter<u32> for Writer {
            fn write(&mut self, items: &Chunk<u32>) -> Result<(), ItemError>;
        }
    }

    fn repository() -> Arc<InMemoryJobRepository> {
        Arc::new(InMemoryJobRepository::new())
    }

    fn new_execution(repository: &InMemoryJobRepository, step: &str) -> StepExecution {
        let params = JobParameters::new();
        let instance = repository.get_or_create_job_instance("job", &params).unwrap();
        let job = repository.create_job_execution(&instance, &params).unwrap();
        let execution = StepExecution::new(step, job.id);
        repository.add_step_execution(&execution).unwrap();
        execution
    }

    #[test]
    fn test_rejects_zero_commit_interval() {
        let err = StepBuilder::new("load", repository())
            .chunk::<u32>(0)
            .reader(ListItemReader::new("r", vec![1]))
            .writer(ListItemWriter::new())
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("STEP-001-COMMIT_INTERVAL"));
        assert_eq!(err.steps, vec!["load".to_string()]);
    }

    #[test]
    fn test_rejects_missing_writer() {
        let err = StepBuilder::new("load", repository())
            .chunk::<u32>(5)
            .reader(ListItemReader::new("r", vec![1]))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("STEP-002-MISSING_COMPONENT"));
        assert!(err.message.contains("writer"));
    }

    #[test]
    fn test_processor_discards_earlier_writer() {
        let err = StepBuilder::new("load", repository())
            .chunk::<u32>(5)
            .reader(ListItemReader::new("r", vec![1]))
            .writer(ListItemWriter::new())
            .processor(FnItemProcessor::new(|n: &u32| Ok(Some(n.to_string()))))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("STEP-002-MISSING_COMPONENT"));
    }

    #[test]
    fn test_rejects_zero_retry_limit() {
        let err = StepBuilder::new("load", repository())
            .chunk::<u32>(5)
            .reader(ListItemReader::new("r", vec![1]))
            .writer(ListItemWriter::new())
            .retry_limit(0)
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("STEP-003-RETRY_LIMIT"));
    }

    #[test]
    fn test_total_cap_only_without_per_phase_limits() {
        let capped = build_fault_tolerance(&FaultToleranceConfig::new().with_skip_limit(3), None, None);
        assert_eq!(capped.skip_limit, Some(3));

        let mut per_phase = FaultToleranceConfig::new();
        per_phase.read_skip_limit = Some(2);
        let uncapped = build_fault_tolerance(&per_phase, None, None);
        assert_eq!(uncapped.skip_limit, None);
    }

    #[test]
    fn test_processor_changes_output_type() {
        let repository = repository();
        let writer = ListItemWriter::new();
        let written = writer.handle();
        let step = StepBuilder::new("format", repository.clone())
            .chunk::<u32>(2)
            .reader(ListItemReader::new("numbers", vec![1, 2, 3]))
            .processor(FnItemProcessor::new(|n: &u32| Ok(Some(format!("#{n}")))))
            .writer(writer)
            .build()
            .unwrap();
        let mut execution = new_execution(&repository, "format");

        step.execute(&mut execution, &StopToken::new()).unwrap();

        assert_eq!(execution.status(), BatchStatus::Completed);
        assert_eq!(*written.lock(), vec!["#1", "#2", "#3"]);
        assert_eq!(execution.commit_count, 2);
        assert_eq!(execution.execution_context.get_long("numbers.read.count"), Some(3));
    }

    #[test]
    fn test_from_config() {
        let config = StepConfig::from_json(
            r#"{"commit_interval": 2, "start_limit": 4, "fault_tolerance": {"skip_limit": 1}}"#,
        )
        .unwrap();
        let repository = repository();
        let writer = FailingItemWriter::new();
        let log = writer.log();
        let step = StepBuilder::new("load", repository.clone())
            .from_config::<u32>(&config)
            .reader(ScriptedReader::new("r", vec![1, 2, 3, 4]).fail_at(1, ItemError::validation("bad")))
            .writer(writer)
            .build()
            .unwrap();
        let mut execution = new_execution(&repository, "load");

        assert_eq!(step.start_limit(), 4);
        step.execute(&mut execution, &StopToken::new()).unwrap();

        assert_eq!(execution.status(), BatchStatus::Completed);
        assert_eq!(log.written(), vec![1, 3, 4]);
        assert_eq!(execution.read_skip_count, 1);
    }

    #[test]
    fn test_writer_sees_each_chunk_once() {
        let mut writer = MockWriter::new();
        writer.expect_open().returning(|_| Ok(()));
        writer.expect_update().returning(|_| Ok(()));
        writer.expect_close().times(1).returning(|| Ok(()));
        writer
            .expect_write()
            .withf(|chunk: &Chunk<u32>| chunk.len() == 3)
            .times(1)
            .returning(|_| Ok(()));
        writer
            .expect_write()
            .withf(|chunk: &Chunk<u32>| chunk.len() == 1)
            .times(1)
            .returning(|_| Ok(()));

        let repository = repository();
        let step = StepBuilder::new("load", repository.clone())
            .chunk::<u32>(3)
            .reader(ListItemReader::new("r", vec![1, 2, 3, 4]))
            .writer(writer)
            .build()
            .unwrap();
        let mut execution = new_execution(&repository, "load");

        step.execute(&mut execution, &StopToken::new()).unwrap();

        assert_eq!(execution.status(), BatchStatus::Completed);
        assert_eq!(execution.write_count, 4);
    }

    #[test]
    fn test_writer_not_called_for_fully_filtered_chunk() {
        let mut writer = MockWriter::new();
        writer.expect_open().returning(|_| Ok(()));
        writer.expect_update().returning(|_| Ok(()));
        writer.expect_close().returning(|| Ok(()));
        writer.expect_write().never();

        let repository = repository();
        let step = StepBuilder::new("load", repository.clone())
            .chunk::<u32>(2)
            .reader(ListItemReader::new("r", vec![1, 2]))
            .processor(FnItemProcessor::new(|_: &u32| Ok(None::<u32>)))
            .writer(writer)
            .build()
            .unwrap();
        let mut execution = new_execution(&repository, "load");

        step.execute(&mut execution, &StopToken::new()).unwrap();

        assert_eq!(execution.status(), BatchStatus::Completed);
        assert_eq!(execution.filter_count, 2);
        assert_eq!(execution.commit_count, 1);
    }
}
