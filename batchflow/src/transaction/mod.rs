//! Transaction boundary for chunk commits.
//!
//! The chunk loop never talks to a [`TransactionManager`] directly. It holds
//! a [`Transaction`] guard that must be committed explicitly and rolls back
//! on every other exit path.

use crate::errors::TransactionError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Identifier of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Begin, commit and rollback supplied by the execution environment.
pub trait TransactionManager: Send + Sync + Debug {
    /// Opens a transaction.
    fn begin(&self) -> Result<TransactionId, TransactionError>;

    /// Commits a transaction.
    fn commit(&self, id: TransactionId) -> Result<(), TransactionError>;

    /// Rolls a transaction back.
    fn rollback(&self, id: TransactionId) -> Result<(), TransactionError>;
}

/// Scoped transaction. Rolls back on drop unless committed or rolled back.
#[derive(Debug)]
pub struct Transaction<'a> {
    manager: &'a dyn TransactionManager,
    id: TransactionId,
    completed: bool,
}

impl<'a> Transaction<'a> {
    /// Opens a transaction on `manager`.
    pub fn begin(manager: &'a dyn TransactionManager) -> Result<Self, TransactionError> {
        let id = manager.begin()?;
        Ok(Self {
            manager,
            id,
            completed: false,
        })
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.completed = true;
        self.manager.commit(self.id)
    }

    /// Rolls the transaction back.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.completed = true;
        self.manager.rollback(self.id)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!(transaction = %self.id, "Transaction dropped without commit, rolling back");
        if let Err(e) = self.manager.rollback(self.id) {
            warn!(transaction = %self.id, error = %e, "Rollback on drop failed");
        }
    }
}

/// Transaction manager with no underlying resource.
///
/// Tracks open transactions and counts outcomes.
#[derive(Default)]
pub struct ResourcelessTransactionManager {
    next_id: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    active: Mutex<HashSet<u64>>,
}

impl ResourcelessTransactionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns the number of rollbacks.
    #[must_use]
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn finish(&self, id: TransactionId) -> bool {
        self.active.lock().remove(&id.0)
    }
}

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<TransactionId, TransactionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.lock().insert(id);
        Ok(TransactionId(id))
    }

    fn commit(&self, id: TransactionId) -> Result<(), TransactionError> {
        if !self.finish(id) {
            return Err(TransactionError::NotActive(id.0));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self, id: TransactionId) -> Result<(), TransactionError> {
        if !self.finish(id) {
            return Err(TransactionError::NotActive(id.0));
        }
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Debug for ResourcelessTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcelessTransactionManager")
            .field("commits", &self.commit_count())
            .field("rollbacks", &self.rollback_count())
            .field("active", &self.active_count())
            .finish()
    }
}
