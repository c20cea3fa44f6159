//! Finalized bytecode arrays

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::constant::ConstantPool;
use crate::decoder::BytecodeIterator;
use crate::handler_table::HandlerTable;
use crate::source_positions::SourcePositionTable;
use crate::verifier::{VerificationMode, Verifier};

/// A finalized bytecode program for one function.
///
/// Immutable once built. The only state change is the one-way `published`
/// flag set by [`BytecodeArray::verify`]; it is never serialized, so a
/// deserialized array has to be verified again.
#[derive(Debug, Serialize, Deserialize)]
pub struct BytecodeArray {
    bytes: Vec<u8>,
    constant_pool: ConstantPool,
    handler_table: HandlerTable,
    #[serde(default)]
    source_positions: SourcePositionTable,
    /// Register file size (locals and temporaries)
    frame_size: u32,
    /// Parameters including the receiver
    parameter_count: u32,
    feedback_slot_count: u32,
    #[serde(skip)]
    published: AtomicBool,
}

impl BytecodeArray {
    /// Assemble an array from its parts
    pub fn new(
        bytes: Vec<u8>,
        constant_pool: ConstantPool,
        handler_table: HandlerTable,
        frame_size: u32,
        parameter_count: u32,
    ) -> Self {
        Self {
            bytes,
            constant_pool,
            handler_table,
            source_positions: SourcePositionTable::new(),
            frame_size,
            parameter_count,
            feedback_slot_count: 0,
            published: AtomicBool::new(false),
        }
    }

    /// Attach a source-position table
    pub fn with_source_positions(mut self, source_positions: SourcePositionTable) -> Self {
        self.source_positions = source_positions;
        self
    }

    /// Set the number of feedback slots referenced by the code
    pub fn with_feedback_slot_count(mut self, count: u32) -> Self {
        self.feedback_slot_count = count;
        self
    }

    /// Raw instruction stream
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the instruction stream in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the stream is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Constant pool
    #[inline]
    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    /// Exception handler ranges
    #[inline]
    pub fn handler_table(&self) -> &HandlerTable {
        &self.handler_table
    }

    /// Bytecode offset to source position map
    #[inline]
    pub fn source_positions(&self) -> &SourcePositionTable {
        &self.source_positions
    }

    /// Number of registers in the frame
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Number of parameters, receiver included
    #[inline]
    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    /// Feedback vector length
    #[inline]
    pub fn feedback_slot_count(&self) -> u32 {
        self.feedback_slot_count
    }

    /// Decode the instruction stream
    pub fn iter(&self) -> BytecodeIterator<'_> {
        BytecodeIterator::new(&self.bytes)
    }

    /// Verify the array and mark it published.
    ///
    /// # Panics
    ///
    /// Panics if verification fails. Malformed control flow must never reach
    /// the dispatch loop, so there is no recoverable path.
    pub fn verify(&self, mode: VerificationMode) {
        if let Err(err) = Verifier::check(self, mode) {
            tracing::error!(
                target: "tern::verifier",
                length = self.len(),
                diagnosis = err.diagnosis(),
                "bytecode verification failed: {}",
                err
            );
            panic!("bytecode verification failed: {}", err);
        }
        tracing::debug!(
            target: "tern::verifier",
            length = self.len(),
            constants = self.constant_pool.len(),
            handlers = self.handler_table.len(),
            ?mode,
            "bytecode verified"
        );
        self.published.store(true, Ordering::Release);
    }

    /// Whether [`verify`](Self::verify) has accepted this array
    #[inline]
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}

// Manual Clone because of the atomic flag. A clone keeps the verdict: its
// contents are identical.
impl Clone for BytecodeArray {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            constant_pool: self.constant_pool.clone(),
            handler_table: self.handler_table.clone(),
            source_positions: self.source_positions.clone(),
            frame_size: self.frame_size,
            parameter_count: self.parameter_count,
            feedback_slot_count: self.feedback_slot_count,
            published: AtomicBool::new(self.is_published()),
        }
    }
}

/// Equality of contents; the published flag is not compared.
impl PartialEq for BytecodeArray {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
            && self.constant_pool == other.constant_pool
            && self.handler_table == other.handler_table
            && self.source_positions == other.source_positions
            && self.frame_size == other.frame_size
            && self.parameter_count == other.parameter_count
            && self.feedback_slot_count == other.feedback_slot_count
    }
}
