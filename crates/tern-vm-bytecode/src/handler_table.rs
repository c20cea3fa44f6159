//! Exception handler table

use serde::{Deserialize, Serialize};

/// How the runtime expects an exception raised in a range to be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatchPrediction {
    /// A catch clause handles the exception
    Caught,
    /// The handler only cleans up and rethrows
    Uncaught,
}

/// One try range: `[start, end)` is protected by the code at `handler_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRange {
    /// First protected bytecode offset
    pub start: u32,
    /// One past the last protected bytecode offset
    pub end: u32,
    /// Offset of the handler's first instruction
    pub handler_offset: u32,
    /// Register holding the context to restore when entering the handler
    pub data: i32,
    /// Catch prediction
    pub prediction: CatchPrediction,
}

/// Ordered sequence of handler ranges; inner ranges come after outer ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerTable {
    entries: Vec<HandlerRange>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a range, returns its index
    pub fn push(&mut self, range: HandlerRange) -> usize {
        self.entries.push(range);
        self.entries.len() - 1
    }

    /// Range at `index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<&HandlerRange> {
        self.entries.get(index)
    }

    /// Mutable range at `index`
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut HandlerRange> {
        self.entries.get_mut(index)
    }

    /// Number of ranges
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no ranges
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over ranges in table order
    pub fn iter(&self) -> impl Iterator<Item = &HandlerRange> {
        self.entries.iter()
    }

    /// Innermost range covering `offset`
    pub fn lookup(&self, offset: u32) -> Option<&HandlerRange> {
        self.entries
            .iter()
            .rev()
            .find(|range| range.start <= offset && offset < range.end)
    }
}

impl From<Vec<HandlerRange>> for HandlerTable {
    fn from(entries: Vec<HandlerRange>) -> Self {
        Self { entries }
    }
}
