//! Per-compilation state shared by every function of one script

use tern_vm_bytecode::BytecodeArray;

use crate::labels::{BytecodeLabel, LabelId};

/// State owned by one compilation and passed down by reference.
///
/// Label ids and literal ids are handed out from counters here, so two
/// compilations never share numbering.
#[derive(Debug, Default)]
pub struct CompilationContext {
    next_label: u32,
    functions: Vec<Option<BytecodeArray>>,
}

impl CompilationContext {
    /// Fresh context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a label unique within this compilation
    pub fn new_label(&mut self) -> BytecodeLabel {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        BytecodeLabel::new(id)
    }

    /// Number of labels created so far
    pub fn label_count(&self) -> u32 {
        self.next_label
    }

    /// Reserve the literal id of a function about to be compiled
    pub fn reserve_literal(&mut self) -> u32 {
        let id = self.functions.len() as u32;
        self.functions.push(None);
        id
    }

    /// Store the compiled array for a reserved literal id
    pub fn install(&mut self, literal_id: u32, array: BytecodeArray) {
        let slot = &mut self.functions[literal_id as usize];
        assert!(slot.is_none(), "literal {} installed twice", literal_id);
        *slot = Some(array);
    }

    /// Number of reserved literals
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Compiled functions in literal id order.
    ///
    /// # Panics
    ///
    /// Panics if a reserved literal was never installed.
    pub fn into_functions(self) -> Vec<BytecodeArray> {
        self.functions
            .into_iter()
            .enumerate()
            .map(|(id, array)| match array {
                Some(array) => array,
                None => panic!("literal {} was reserved but never compiled", id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_context() {
        let mut first = CompilationContext::new();
        let mut second = CompilationContext::new();
        let a = first.new_label();
        let b = first.new_label();
        let c = second.new_label();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), c.id());
        assert_eq!(first.label_count(), 2);

        assert_eq!(first.reserve_literal(), 0);
        assert_eq!(first.reserve_literal(), 1);
        assert_eq!(second.reserve_literal(), 0);
    }
}
