//! Bytecode offset to source position mapping

use serde::{Deserialize, Serialize};

/// One mapping entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePositionEntry {
    /// Offset of the instruction the position is attached to
    pub bytecode_offset: u32,
    /// Source position (character offset)
    pub source_position: u32,
    /// Statement position (breakable) rather than an expression position
    pub is_statement: bool,
}

/// Positions ordered by bytecode offset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePositionTable {
    entries: Vec<SourcePositionEntry>,
}

impl SourcePositionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries must arrive in non-decreasing offset order;
    /// a second entry for the same offset replaces an expression position but
    /// never a statement position.
    pub fn push(&mut self, entry: SourcePositionEntry) {
        if let Some(last) = self.entries.last_mut() {
            debug_assert!(last.bytecode_offset <= entry.bytecode_offset);
            if last.bytecode_offset == entry.bytecode_offset {
                if !last.is_statement || entry.is_statement {
                    *last = entry;
                }
                return;
            }
        }
        self.entries.push(entry);
    }

    /// Entry attached exactly at `offset`
    pub fn at(&self, offset: u32) -> Option<&SourcePositionEntry> {
        self.entries
            .binary_search_by_key(&offset, |e| e.bytecode_offset)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Closest entry at or before `offset`
    pub fn position_for(&self, offset: u32) -> Option<u32> {
        let idx = self.entries.partition_point(|e| e.bytecode_offset <= offset);
        idx.checked_sub(1).map(|i| self.entries[i].source_position)
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = &SourcePositionEntry> {
        self.entries.iter()
    }
}
