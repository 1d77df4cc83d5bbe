//! Scripted readers, processors and writers for testing.

use crate::context::ExecutionContext;
use crate::errors::ItemError;
use crate::item::{Chunk, ItemProcessor, ItemReader, ItemStream, ItemWriter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A reader over a list that fails at chosen positions.
///
/// A permanent failure consumes the item at its position, so a skipped read
/// is never seen again. A transient failure leaves the position unchanged
/// and succeeds once its failures are used up. The position is checkpointed
/// under `"<name>.read.count"`.
#[derive(Debug)]
pub struct ScriptedReader<T> {
    name: String,
    items: Vec<T>,
    position: usize,
    failures: HashMap<usize, ItemError>,
    transient: HashMap<usize, u32>,
    calls: Arc<AtomicUsize>,
}

impl<T: Clone + Send> ScriptedReader<T> {
    /// Creates a reader over `items`.
    #[must_use]
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items,
            position: 0,
            failures: HashMap::new(),
            transient: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails the read at zero-based `index` with `error`.
    #[must_use]
    pub fn fail_at(mut self, index: usize, error: ItemError) -> Self {
        self.failures.insert(index, error);
        self
    }

    /// Fails the read at `index` with a transient I/O error `times` times.
    #[must_use]
    pub fn fail_transiently_at(mut self, index: usize, times: u32) -> Self {
        self.transient.insert(index, times);
        self
    }

    /// Shared counter of `read` calls.
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Returns the context key holding the read position.
    #[must_use]
    pub fn position_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

impl<T: Clone + Send> ItemStream for ScriptedReader<T> {
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let position = context.get_long_or(&self.position_key(), 0);
        self.position = usize::try_from(position)
            .map_err(|_| ItemError::fatal_configuration(format!("invalid read position {position}")))?;
        Ok(())
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        let position = i64::try_from(self.position)
            .map_err(|_| ItemError::other("overflow", "read position out of range"))?;
        context.put_long(self.position_key(), position);
        Ok(())
    }
}

impl<T: Clone + Send> ItemReader<T> for ScriptedReader<T> {
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.position >= self.items.len() {
            return Ok(None);
        }

        if let Some(remaining) = self.transient.get_mut(&self.position) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ItemError::transient_io(format!(
                    "item {} temporarily unavailable",
                    self.position
                )));
            }
        }

        let index = self.position;
        self.position += 1;
        if let Some(error) = self.failures.get(&index) {
            return Err(error.clone());
        }
        Ok(self.items.get(index).cloned())
    }
}

/// A pass-through processor that fails, filters or flakes on chosen items.
#[derive(Debug)]
pub struct FailingItemProcessor<T> {
    failures: Vec<(T, ItemError)>,
    transient: Vec<(T, u32)>,
    filtered: Vec<T>,
    calls: Arc<AtomicUsize>,
}

impl<T: Clone + PartialEq + Debug + Send> FailingItemProcessor<T> {
    /// Creates a processor that passes every item through.
    #[must_use]
    pub fn new() -> Self {
        Self {
            failures: Vec::new(),
            transient: Vec::new(),
            filtered: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails every attempt to process `item`.
    #[must_use]
    pub fn fail_on(mut self, item: T, error: ItemError) -> Self {
        self.failures.push((item, error));
        self
    }

    /// Fails processing of `item` with a transient I/O error `times` times.
    #[must_use]
    pub fn fail_transiently_on(mut self, item: T, times: u32) -> Self {
        self.transient.push((item, times));
        self
    }

    /// Filters `item` out.
    #[must_use]
    pub fn filter(mut self, item: T) -> Self {
        self.filtered.push(item);
        self
    }

    /// Shared counter of `process` calls.
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl<T: Clone + PartialEq + Debug + Send> Default for FailingItemProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + Debug + Send> ItemProcessor<T, T> for FailingItemProcessor<T> {
    fn process(&mut self, item: &T) -> Result<Option<T>, ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((_, remaining)) = self.transient.iter_mut().find(|(t, _)| t == item) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ItemError::transient_io(format!("processing {item:?} timed out")));
            }
        }
        if let Some((_, error)) = self.failures.iter().find(|(t, _)| t == item) {
            return Err(error.clone());
        }
        if self.filtered.contains(item) {
            return Ok(None);
        }
        Ok(Some(item.clone()))
    }
}

/// What a [`FailingItemWriter`] did, readable after the writer moved into a step.
#[derive(Debug)]
pub struct WriteLog<T> {
    written: Arc<Mutex<Vec<T>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl<T: Clone> WriteLog<T> {
    /// Items written successfully, in order.
    #[must_use]
    pub fn written(&self) -> Vec<T> {
        self.written.lock().clone()
    }

    /// Sizes of every batch the writer was called with, failed ones included.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }

    /// Number of `write` calls.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.batches.lock().len()
    }
}

impl<T> Clone for WriteLog<T> {
    fn clone(&self) -> Self {
        Self {
            written: Arc::clone(&self.written),
            batches: Arc::clone(&self.batches),
        }
    }
}

/// A writer that rejects every batch containing a chosen item, or fails its
/// next few calls with transient errors. Failed batches write nothing.
#[derive(Debug)]
pub struct FailingItemWriter<T> {
    log: WriteLog<T>,
    failures: Vec<(T, ItemError)>,
    transient_calls: u32,
}

impl<T: Clone + PartialEq + Debug + Send> FailingItemWriter<T> {
    /// Creates a writer that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: WriteLog {
                written: Arc::new(Mutex::new(Vec::new())),
                batches: Arc::new(Mutex::new(Vec::new())),
            },
            failures: Vec::new(),
            transient_calls: 0,
        }
    }

    /// Rejects any batch containing `item`.
    #[must_use]
    pub fn fail_on(mut self, item: T, error: ItemError) -> Self {
        self.failures.push((item, error));
        self
    }

    /// Fails the next `calls` writes with a transient I/O error.
    #[must_use]
    pub fn fail_transiently(mut self, calls: u32) -> Self {
        self.transient_calls = calls;
        self
    }

    /// Returns a handle on what the writer did.
    #[must_use]
    pub fn log(&self) -> WriteLog<T> {
        self.log.clone()
    }
}

impl<T: Clone + PartialEq + Debug + Send> Default for FailingItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + Debug + Send> ItemStream for FailingItemWriter<T> {}

impl<T: Clone + PartialEq + Debug + Send> ItemWriter<T> for FailingItemWriter<T> {
    fn write(&mut self, items: &Chunk<T>) -> Result<(), ItemError> {
        self.log.batches.lock().push(items.len());

        if self.transient_calls > 0 {
            self.transient_calls -= 1;
            return Err(ItemError::transient_io("writer connection reset"));
        }
        if let Some((_, error)) = self
            .failures
            .iter()
            .find(|(bad, _)| items.iter().any(|item| item == bad))
        {
            return Err(error.clone());
        }

        self.log.written.lock().extend(items.iter().cloned());
        Ok(())
    }
}
