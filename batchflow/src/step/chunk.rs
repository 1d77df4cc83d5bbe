//! The chunk-oriented tasklet: read, process and write one chunk.

use super::tasklet::{ChunkContext, RepeatStatus, Tasklet};
use crate::context::ExecutionContext;
use crate::domain::StepContribution;
use crate::errors::{BatchError, ChunkPhase, ItemError, ItemErrorKind, SkipLimitExceededError};
use crate::events::{types, EventSink};
use crate::item::{Chunk, ItemProcessor, ItemReader, ItemWriter};
use crate::policy::{NeverSkipItemSkipPolicy, RetryFailure, RetryTemplate, SkipPolicy};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retry and skip policies applied inside a chunk.
#[derive(Debug, Clone)]
pub struct FaultTolerance {
    /// Retry applied to every read, process and write call.
    pub retry: RetryTemplate,
    /// Skip policy for read failures.
    pub read_skip: Arc<dyn SkipPolicy>,
    /// Skip policy for process failures.
    pub process_skip: Arc<dyn SkipPolicy>,
    /// Skip policy for write failures.
    pub write_skip: Arc<dyn SkipPolicy>,
    /// Cap on the sum of all skips, if any.
    pub skip_limit: Option<u64>,
}

impl FaultTolerance {
    /// No retries, no skips.
    #[must_use]
    pub fn none() -> Self {
        let never: Arc<dyn SkipPolicy> = Arc::new(NeverSkipItemSkipPolicy);
        Self {
            retry: RetryTemplate::never(),
            read_skip: Arc::clone(&never),
            process_skip: Arc::clone(&never),
            write_skip: never,
            skip_limit: None,
        }
    }

    fn skip_policy(&self, phase: ChunkPhase) -> &dyn SkipPolicy {
        match phase {
            ChunkPhase::Read => self.read_skip.as_ref(),
            ChunkPhase::Process => self.process_skip.as_ref(),
            ChunkPhase::Write => self.write_skip.as_ref(),
        }
    }
}

impl Default for FaultTolerance {
    fn default() -> Self {
        Self::none()
    }
}

/// Outcome of one chunk cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
    /// Counter deltas, applied at commit.
    pub contribution: StepContribution,
    /// The reader reported end of data.
    pub end_of_data: bool,
    /// The batch failed as a whole and items were written one at a time.
    pub scanned: bool,
}

/// Reads up to `commit_interval` items, processes them and writes the
/// survivors as one batch.
pub struct ChunkOrientedTasklet<I, O> {
    reader: Mutex<Box<dyn ItemReader<I>>>,
    processor: Mutex<Box<dyn ItemProcessor<I, O>>>,
    writer: Mutex<Box<dyn ItemWriter<O>>>,
    fault_tolerance: FaultTolerance,
    commit_interval: usize,
    write_empty_chunks: bool,
    events: Arc<dyn EventSink>,
}

impl<I, O> ChunkOrientedTasklet<I, O> {
    /// Creates a tasklet.
    #[must_use]
    pub fn new(
        reader: Box<dyn ItemReader<I>>,
        processor: Box<dyn ItemProcessor<I, O>>,
        writer: Box<dyn ItemWriter<O>>,
        commit_interval: usize,
    ) -> Self {
        Self {
            reader: Mutex::new(reader),
            processor: Mutex::new(processor),
            writer: Mutex::new(writer),
            fault_tolerance: FaultTolerance::none(),
            commit_interval: commit_interval.max(1),
            write_empty_chunks: false,
            events: Arc::new(crate::events::NoOpEventSink),
        }
    }

    /// Sets the retry and skip policies.
    #[must_use]
    pub fn with_fault_tolerance(mut self, fault_tolerance: FaultTolerance) -> Self {
        self.fault_tolerance = fault_tolerance;
        self
    }

    /// Calls the writer even when every item of a chunk was skipped or filtered.
    #[must_use]
    pub fn with_write_empty_chunks(mut self, enabled: bool) -> Self {
        self.write_empty_chunks = enabled;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the commit interval.
    #[must_use]
    pub fn commit_interval(&self) -> usize {
        self.commit_interval
    }

    /// Runs one chunk cycle inside the context's transaction.
    ///
    /// Item failures are retried and skipped according to the policies. An
    /// error is returned only when they cannot be resolved; the caller then
    /// rolls the transaction back.
    pub fn execute_chunk(&self, ctx: &mut ChunkContext<'_, '_>) -> Result<ChunkResult, BatchError> {
        let mut contribution = StepContribution::default();

        let (inputs, end_of_data) = self.read_items(ctx, &mut contribution)?;
        let outputs = self.process_items(&inputs, ctx, &mut contribution)?;

        let mut scanned = false;
        if !outputs.is_empty() || (self.write_empty_chunks && !contribution.is_empty()) {
            scanned = self.write_items(Chunk::of(outputs), ctx, &mut contribution)?;
        }

        debug!(
            step = %ctx.step_name(),
            read = contribution.read_count,
            written = contribution.write_count,
            filtered = contribution.filter_count,
            skipped = contribution.skip_count(),
            end_of_data,
            "Chunk processed"
        );

        Ok(ChunkResult {
            contribution,
            end_of_data,
            scanned,
        })
    }

    fn read_items(
        &self,
        ctx: &ChunkContext<'_, '_>,
        contribution: &mut StepContribution,
    ) -> Result<(Vec<I>, bool), BatchError> {
        let mut reader = self.reader.lock();
        let mut items = Vec::with_capacity(self.commit_interval);

        while items.len() < self.commit_interval {
            match self.fault_tolerance.retry.execute(|_| reader.read()) {
                Ok(Some(item)) => {
                    contribution.read_count += 1;
                    items.push(item);
                }
                Ok(None) => return Ok((items, true)),
                Err(failure) => self.skip_or_fail(ChunkPhase::Read, failure, ctx, contribution)?,
            }
        }

        Ok((items, false))
    }

    fn process_items(
        &self,
        inputs: &[I],
        ctx: &ChunkContext<'_, '_>,
        contribution: &mut StepContribution,
    ) -> Result<Vec<O>, BatchError> {
        let mut processor = self.processor.lock();
        let mut outputs = Vec::with_capacity(inputs.len());

        for item in inputs {
            match self.fault_tolerance.retry.execute(|_| processor.process(item)) {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => contribution.filter_count += 1,
                Err(failure) => self.skip_or_fail(ChunkPhase::Process, failure, ctx, contribution)?,
            }
        }

        Ok(outputs)
    }

    /// Writes the batch, retrying it in a fresh transaction on retryable
    /// errors. Falls back to a left-to-right scan when the batch keeps
    /// failing with a skippable error. Returns whether a scan ran.
    ///
    /// The transaction is restarted only when another write follows. A
    /// failure that ends the chunk leaves the rollback to the caller.
    fn write_items(
        &self,
        chunk: Chunk<O>,
        ctx: &mut ChunkContext<'_, '_>,
        contribution: &mut StepContribution,
    ) -> Result<bool, BatchError> {
        let mut writer = self.writer.lock();
        let policy = self.fault_tolerance.retry.policy();
        let mut attempt = 0;

        let error = loop {
            let error = match writer.write(&chunk) {
                Ok(()) => {
                    contribution.write_count += chunk.len() as u64;
                    return Ok(false);
                }
                Err(error) => error,
            };
            attempt += 1;

            if error.kind.bypasses_policies() {
                return Err(self.fail(ChunkPhase::Write, error, attempt, ctx));
            }
            if !policy.should_retry(&error, attempt) {
                break error;
            }

            self.restart_after_write_failure(ctx, attempt, &error)?;
            warn!(
                step = %ctx.step_name(),
                attempt,
                error = %error,
                "Batch write failed, retrying in a new transaction"
            );
            self.fault_tolerance.retry.backoff().pause(attempt);
        };

        if chunk.is_empty() {
            return Err(self.fail(ChunkPhase::Write, error, attempt, ctx));
        }
        if chunk.len() == 1 {
            self.skip_or_fail(
                ChunkPhase::Write,
                RetryFailure {
                    error: error.clone(),
                    attempts: attempt,
                },
                ctx,
                contribution,
            )?;
            self.restart_after_write_failure(ctx, attempt, &error)?;
            return Ok(false);
        }

        let phase_count = ctx.committed_skip_count(ChunkPhase::Write) + contribution.write_skip_count;
        match self.fault_tolerance.write_skip.should_skip(&error, phase_count) {
            Ok(true) => {}
            Ok(false) => return Err(self.fail(ChunkPhase::Write, error, attempt, ctx)),
            Err(exceeded) => return Err(exceeded.into()),
        }

        self.restart_after_write_failure(ctx, attempt, &error)?;
        warn!(
            step = %ctx.step_name(),
            items = chunk.len(),
            error = %error,
            "Batch write failed, writing items one at a time"
        );
        self.events.try_emit(
            types::CHUNK_SCAN,
            Some(json!({ "step": ctx.step_name(), "items": chunk.len() })),
        );

        // Every item already took part in the failed batch attempts.
        for item in chunk {
            let single = Chunk::of(vec![item]);
            match self.fault_tolerance.retry.execute_from(attempt, |_| writer.write(&single)) {
                Ok(()) => contribution.write_count += 1,
                Err(failure) => self.skip_or_fail(ChunkPhase::Write, failure, ctx, contribution)?,
            }
        }

        Ok(true)
    }

    fn restart_after_write_failure(
        &self,
        ctx: &mut ChunkContext<'_, '_>,
        attempt: u32,
        error: &ItemError,
    ) -> Result<(), BatchError> {
        ctx.restart_transaction()?;
        self.events.try_emit(
            types::CHUNK_ROLLED_BACK,
            Some(json!({
                "step": ctx.step_name(),
                "attempt": attempt,
                "error": error.to_string(),
            })),
        );
        Ok(())
    }

    /// Resolves an item failure after retries gave up: records a skip if the
    /// phase's policy and the total limit allow it, otherwise returns the
    /// error that aborts the chunk.
    fn skip_or_fail(
        &self,
        phase: ChunkPhase,
        failure: RetryFailure,
        ctx: &ChunkContext<'_, '_>,
        contribution: &mut StepContribution,
    ) -> Result<(), BatchError> {
        let RetryFailure { error, attempts } = failure;
        if error.kind.bypasses_policies() {
            return Err(self.fail(phase, error, attempts, ctx));
        }

        let policy = self.fault_tolerance.skip_policy(phase);
        let phase_count = ctx.committed_skip_count(phase) + contribution.skip_count_for(phase);
        match policy.should_skip(&error, phase_count) {
            Ok(true) => {
                if let Some(limit) = self.fault_tolerance.skip_limit {
                    let total = ctx.committed_total_skip_count() + contribution.skip_count();
                    if total >= limit {
                        return Err(SkipLimitExceededError::new(limit, error).into());
                    }
                }
                contribution.increment_skip(phase);
                info!(
                    step = %ctx.step_name(),
                    phase = %phase,
                    attempts,
                    error = %error,
                    "Item skipped"
                );
                self.events.try_emit(
                    types::ITEM_SKIPPED,
                    Some(json!({
                        "step": ctx.step_name(),
                        "phase": phase,
                        "error": error.to_string(),
                        "error_kind": error.kind,
                    })),
                );
                Ok(())
            }
            Ok(false) => Err(self.fail(phase, error, attempts, ctx)),
            Err(exceeded) => {
                warn!(step = %ctx.step_name(), phase = %phase, limit = exceeded.limit, "Skip limit exceeded");
                Err(exceeded.into())
            }
        }
    }

    fn fail(&self, phase: ChunkPhase, error: ItemError, attempts: u32, ctx: &ChunkContext<'_, '_>) -> BatchError {
        match error.kind {
            ItemErrorKind::FatalConfiguration => BatchError::FatalConfiguration(error),
            ItemErrorKind::ResourceAcquisition => BatchError::ResourceAcquisition {
                step: ctx.step_name().to_string(),
                source: error,
            },
            _ if attempts > 1 => BatchError::RetryExhausted {
                phase,
                attempts,
                source: error,
            },
            _ => BatchError::Item { phase, source: error },
        }
    }
}

impl<I, O> Tasklet for ChunkOrientedTasklet<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn open(&self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.reader.lock().open(context)?;
        self.writer.lock().open(context)
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        self.reader.lock().update(context)?;
        self.writer.lock().update(context)
    }

    fn close(&self) -> Result<(), ItemError> {
        let reader = self.reader.lock().close();
        let writer = self.writer.lock().close();
        reader.and(writer)
    }

    fn execute(
        &self,
        contribution: &mut StepContribution,
        chunk_context: &mut ChunkContext<'_, '_>,
    ) -> Result<RepeatStatus, BatchError> {
        let result = self.execute_chunk(chunk_context)?;
        contribution.merge(&result.contribution);
        Ok(if result.end_of_data {
            RepeatStatus::Finished
        } else {
            RepeatStatus::Continuable
        })
    }
}

impl<I, O> std::fmt::Debug for ChunkOrientedTasklet<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkOrientedTasklet")
            .field("commit_interval", &self.commit_interval)
            .field("write_empty_chunks", &self.write_empty_chunks)
            .field("fault_tolerance", &self.fault_tolerance)
            .finish_non_exhaustive()
    }
}
