//! Bookkeeping for variable registers used directly as operands

use smallvec::SmallVec;
use tern_vm_bytecode::{Register, RegisterList};

use crate::register_allocator::RegisterAllocationObserver;

/// Tracks variable registers that stand in for a loaded operand.
///
/// When a binary operation uses a variable's own register as its left
/// operand instead of a copy, the variable must not be stored to before the
/// operation consumes it. Each alias remembers the allocator position of the
/// register scope that created it and expires when that scope is released.
#[derive(Debug, Default)]
pub struct OperandAliasTracker {
    aliases: SmallVec<[(Register, i32); 4]>,
}

impl OperandAliasTracker {
    /// Start aliasing `register` in the scope opened at `scope_start`
    pub fn alias(&mut self, register: Register, scope_start: i32) {
        self.aliases.push((register, scope_start));
    }

    /// Whether `register` is currently used as an operand alias
    pub fn is_aliased(&self, register: Register) -> bool {
        self.aliases.iter().any(|(r, _)| *r == register)
    }

    /// Number of live aliases
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether no alias is live
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl RegisterAllocationObserver for OperandAliasTracker {
    fn register_allocated(&mut self, _register: Register) {}

    fn register_list_allocated(&mut self, _list: RegisterList) {}

    fn registers_released(&mut self, first_free: i32) {
        self.aliases.retain(|(_, scope_start)| *scope_start < first_free);
    }
}
