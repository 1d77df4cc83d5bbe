//! Item reader, processor and writer capabilities.
//!
//! These are the only seams between the engine and the data it moves. All
//! calls are synchronous and run on the step's worker.

mod support;

pub use support::{FnItemProcessor, ListItemReader, ListItemWriter, PassThroughItemProcessor};

use crate::context::ExecutionContext;
use crate::errors::ItemError;

/// Lifecycle hooks that let a reader or writer checkpoint its position.
///
/// `open` is called once before the first chunk with the context restored
/// from the last committed chunk. `update` is called before every commit and
/// must record enough in the context to resume after that chunk. `close` is
/// called once when the step ends, whatever its outcome.
pub trait ItemStream: Send {
    /// Restores state from the execution context.
    fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Saves the current position into the execution context.
    fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Releases resources.
    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Supplies items one at a time.
pub trait ItemReader<T>: ItemStream {
    /// Reads the next item. `Ok(None)` signals end of data.
    fn read(&mut self) -> Result<Option<T>, ItemError>;
}

/// Transforms one item.
pub trait ItemProcessor<I, O>: Send {
    /// Processes an item. `Ok(None)` filters it out of the chunk.
    fn process(&mut self, item: &I) -> Result<Option<O>, ItemError>;
}

/// Consumes items a chunk at a time.
pub trait ItemWriter<T>: ItemStream {
    /// Writes a chunk. Must accept an empty chunk.
    fn write(&mut self, items: &Chunk<T>) -> Result<(), ItemError>;
}

/// An ordered batch of items handed to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<T> {
    items: Vec<T>,
}

impl<T> Chunk<T> {
    /// Creates an empty chunk.
    #[must_use]
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Creates a chunk from items.
    #[must_use]
    pub fn of(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Appends an item.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the chunk holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the items.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Returns the items as a slice.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the chunk.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for Chunk<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Chunk<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Chunk<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
