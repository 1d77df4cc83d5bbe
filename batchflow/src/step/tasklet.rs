//! The unit of work a step repeats inside one transaction.

use crate::context::ExecutionContext;
use crate::domain::{StepContribution, StepExecution};
use crate::errors::{BatchError, ChunkPhase, ItemError, TransactionError};
use crate::transaction::{Transaction, TransactionId, TransactionManager};

/// Whether a tasklet has more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// Call the tasklet again in a new transaction.
    Continuable,
    /// The step is done once this transaction commits.
    Finished,
}

/// What a tasklet sees of the step while its transaction is open.
///
/// The step execution is read-only here: it reflects the last committed
/// chunk. The transaction can be rolled back and reopened mid-tasklet, which
/// the chunk loop does before re-writing a failed batch.
#[derive(Debug)]
pub struct ChunkContext<'s, 't> {
    step_execution: &'s StepExecution,
    transaction: Option<Transaction<'t>>,
    manager: &'t dyn TransactionManager,
    rollbacks: u64,
}

impl<'s, 't> ChunkContext<'s, 't> {
    /// Wraps an open transaction.
    #[must_use]
    pub fn new(
        step_execution: &'s StepExecution,
        transaction: Transaction<'t>,
        manager: &'t dyn TransactionManager,
    ) -> Self {
        Self {
            step_execution,
            transaction: Some(transaction),
            manager,
            rollbacks: 0,
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_execution.step_name
    }

    /// Returns the step execution as of the last commit.
    #[must_use]
    pub fn step_execution(&self) -> &StepExecution {
        self.step_execution
    }

    /// Returns committed skips for one phase.
    #[must_use]
    pub fn committed_skip_count(&self, phase: ChunkPhase) -> u64 {
        self.step_execution.skip_count_for(phase)
    }

    /// Returns committed skips across all phases.
    #[must_use]
    pub fn committed_total_skip_count(&self) -> u64 {
        self.step_execution.skip_count()
    }

    /// Returns the id of the open transaction.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(Transaction::id)
    }

    /// Returns the rollbacks performed through this context.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    /// Rolls back the open transaction and begins a fresh one.
    pub fn restart_transaction(&mut self) -> Result<(), TransactionError> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()?;
            self.rollbacks += 1;
        }
        self.transaction = Some(Transaction::begin(self.manager)?);
        Ok(())
    }

    /// Releases the transaction and the rollback count to the step.
    #[must_use]
    pub fn into_parts(self) -> (Option<Transaction<'t>>, u64) {
        (self.transaction, self.rollbacks)
    }
}

/// Work repeated by a step, one call per transaction.
///
/// The stream hooks mirror [`ItemStream`](crate::item::ItemStream): `open`
/// before the first call, `update` before every commit, `close` at the end.
pub trait Tasklet: Send + Sync {
    /// Restores state from the step's execution context.
    fn open(&self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Saves state into the context about to be committed.
    fn update(&self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Releases resources.
    fn close(&self) -> Result<(), ItemError> {
        Ok(())
    }

    /// Runs one unit of work, recording counters in `contribution`.
    ///
    /// The contribution is applied to the step execution only if the
    /// transaction commits.
    fn execute(
        &self,
        contribution: &mut StepContribution,
        chunk_context: &mut ChunkContext<'_, '_>,
    ) -> Result<RepeatStatus, BatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ResourcelessTransactionManager;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_restart_transaction_counts_rollback() {
        let manager = ResourcelessTransactionManager::new();
        let execution = StepExecution::new("load", Uuid::now_v7());
        let tx = Transaction::begin(&manager).unwrap();
        let first = tx.id();

        let mut ctx = ChunkContext::new(&execution, tx, &manager);
        ctx.restart_transaction().unwrap();

        assert_ne!(ctx.transaction_id(), Some(first));
        assert_eq!(ctx.rollbacks(), 1);
        assert_eq!(manager.rollback_count(), 1);
        assert_eq!(manager.active_count(), 1);

        let (tx, rollbacks) = ctx.into_parts();
        tx.unwrap().commit().unwrap();
        assert_eq!(rollbacks, 1);
        assert_eq!(manager.commit_count(), 1);
    }
}
