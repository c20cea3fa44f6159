//! Jump labels

use tern_vm_bytecode::OperandScale;

/// Identity of a label within one compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// A jump destination, bound exactly once to a bytecode offset.
///
/// Labels are created by [`CompilationContext::new_label`](crate::CompilationContext::new_label)
/// and tracked by the [`BytecodeArrayBuilder`](crate::BytecodeArrayBuilder)
/// that references or binds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BytecodeLabel {
    id: LabelId,
}

impl BytecodeLabel {
    pub(crate) fn new(id: LabelId) -> Self {
        Self { id }
    }

    /// Label identity
    #[inline]
    pub fn id(&self) -> LabelId {
        self.id
    }
}

/// A place that must be patched once its label is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelSite {
    /// Forward jump instruction
    Jump {
        /// Offset of the instruction (its prefix, if any)
        instruction: usize,
        /// Offset of the opcode byte
        opcode_at: usize,
        /// Scale the instruction was emitted with
        scale: OperandScale,
        /// Constant pool slot reserved in case the delta does not fit
        reservation: u32,
    },
    /// Entry of a switch jump table
    TableEntry {
        /// Offset of the switch instruction
        switch_at: usize,
        /// Reserved constant pool slot of the entry
        index: u32,
    },
}

/// Binding state of a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LabelState {
    /// Not yet bound; sites wait for the offset
    Unbound(Vec<LabelSite>),
    /// Bound to an offset
    Bound(usize),
}
