//! In-memory item adapters.

use super::{Chunk, ItemProcessor, ItemReader, ItemStream, ItemWriter};
use crate::context::ExecutionContext;
use crate::errors::ItemError;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads items from a vector, restartable from the execution context.
///
/// The position is stored under `"<name>.read.count"` and counts every item
/// handed out, so a committed chunk is never read again after a restart.
#[derive(Debug, Clone)]
pub struct ListItemReader<T> {
    name: String,
    items: Vec<T>,
    position: usize,
}

impl<T: Clone + Send> ListItemReader<T> {
    /// Creates a reader over `items`.
    #[must_use]
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items,
            position: 0,
        }
    }

    /// Returns the context key holding the read position.
    #[must_use]
    pub fn position_key(&self) -> String {
        format!("{}.read.count", self.name)
    }

    /// Returns the number of items handed out so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<T: Clone + Send> ItemStream for ListItemReader<T> {
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

impl<T: Clone + Send> ItemReader<T> for ListItemReader<T> {
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }
}

/// Collects written items into a shared vector.
#[derive(Debug)]
pub struct ListItemWriter<T> {
    written: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send> ListItemWriter<T> {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a handle that sees every item written, usable after the
    /// writer has moved into a step.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.written)
    }

    /// Returns a copy of the written items.
    #[must_use]
    pub fn written(&self) -> Vec<T> {
        self.written.lock().clone()
    }
}

impl<T: Clone + Send> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> ItemStream for ListItemWriter<T> {}

impl<T: Clone + Send> ItemWriter<T> for ListItemWriter<T> {
    fn write(&mut self, items: &Chunk<T>) -> Result<(), ItemError> {
        self.written.lock().extend(items.iter().cloned());
        Ok(())
    }
}

/// Hands every item through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughItemProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughItemProcessor {
    fn process(&mut self, item: &T) -> Result<Option<T>, ItemError> {
        Ok(Some(item.clone()))
    }
}

/// Adapts a closure into a processor.
pub struct FnItemProcessor<I, O, F> {
    f: F,
    _marker: PhantomData<fn(&I) -> O>,
}

impl<I, O, F> FnItemProcessor<I, O, F>
where
    F: FnMut(&I) -> Result<Option<O>, ItemError> + Send,
{
    /// Wraps `f`.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> ItemProcessor<I, O> for FnItemProcessor<I, O, F>
where
    F: FnMut(&I) -> Result<Option<O>, ItemError> + Send,
{
    fn process(&mut self, item: &I) -> Result<Option<O>, ItemError> {
        (self.f)(item)
    }
}

impl<I, O, F> std::fmt::Debug for FnItemProcessor<I, O, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnItemProcessor").finish_non_exhaustive()
    }
}
