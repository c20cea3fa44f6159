//! Loop nesting recovered from back-edges
//!
//! A loop is identified by its header, the target of one or more back-edges.
//! It spans from the header through its last back-edge. Loops emitted by the
//! compiler nest properly, so one scan with a stack of open headers gives the
//! innermost loop for every offset.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tern_vm_bytecode::{BytecodeArray, VerifyError};

use crate::branch_analysis::BranchAnalysis;

/// Loop structure of one array
#[derive(Debug, Clone)]
pub struct LoopAnalysis {
    branches: BranchAnalysis,
    parents: FxHashMap<usize, Option<usize>>,
    ends: FxHashMap<usize, usize>,
    /// Innermost loop from each key offset until the next key
    innermost: BTreeMap<usize, Option<usize>>,
}

impl LoopAnalysis {
    /// Analyze `array`
    pub fn analyze(array: &BytecodeArray) -> Result<Self, VerifyError> {
        let branches = BranchAnalysis::analyze(array)?;
        let mut parents = FxHashMap::default();
        let mut ends = FxHashMap::default();
        let mut innermost = BTreeMap::new();
        innermost.insert(0, None);

        let mut open: Vec<usize> = Vec::new();
        for instruction in array.iter() {
            let instruction = instruction?;
            let offset = instruction.offset();

            if branches.is_loop_header(offset) {
                parents.insert(offset, open.last().copied());
                open.push(offset);
                innermost.insert(offset, Some(offset));
            }

            // Jumps and switches alike: close the outermost open loop whose
            // last back-edge is this instruction, and anything opened inside
            let closing = open
                .iter()
                .position(|&header| branches.back_edges_to(header).last() == Some(&offset));
            if let Some(position) = closing {
                for closed in open.drain(position..) {
                    ends.insert(closed, offset);
                }
                innermost.insert(instruction.next_offset(), open.last().copied());
            }
        }

        tracing::debug!(
            target: "tern::analysis",
            loops = parents.len(),
            "loop analysis"
        );
        Ok(Self {
            branches,
            parents,
            ends,
            innermost,
        })
    }

    /// Header of the innermost loop containing `offset`
    pub fn innermost_loop(&self, offset: usize) -> Option<usize> {
        self.innermost
            .range(..=offset)
            .next_back()
            .and_then(|(_, header)| *header)
    }

    /// Header of the loop enclosing the loop at `header`, if any
    pub fn parent_loop(&self, header: usize) -> Option<usize> {
        self.parents.get(&header).copied().flatten()
    }

    /// Offset of the last back-edge of the loop at `header`
    pub fn loop_end(&self, header: usize) -> Option<usize> {
        self.ends.get(&header).copied()
    }

    /// Number of loops containing `offset`
    pub fn depth_at(&self, offset: usize) -> usize {
        let mut depth = 0;
        let mut current = self.innermost_loop(offset);
        while let Some(header) = current {
            depth += 1;
            current = self.parent_loop(header);
        }
        depth
    }

    /// Every loop header, ascending
    pub fn loop_headers(&self) -> Vec<usize> {
        self.branches.loop_headers()
    }

    /// The underlying branch analysis
    pub fn branches(&self) -> &BranchAnalysis {
        &self.branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_vm_bytecode::{ConstantPool, HandlerTable, Opcode};

    fn analyze(bytes: Vec<u8>) -> LoopAnalysis {
        let array = BytecodeArray::new(bytes, ConstantPool::new(), HandlerTable::new(), 0, 1);
        LoopAnalysis::analyze(&array).unwrap()
    }

    #[test]
    fn test_single_loop() {
        // 0: LdaZero
        // 1: StackCheck
        // 2: JumpLoop -1, 0 -> 1
        // 5: Return
        let analysis = analyze(vec![
            Opcode::LdaZero.to_byte(),
            Opcode::StackCheck.to_byte(),
            Opcode::JumpLoop.to_byte(),
            (-1i8) as u8,
            0,
            Opcode::Return.to_byte(),
        ]);

        assert_eq!(analysis.innermost_loop(0), None);
        assert_eq!(analysis.innermost_loop(1), Some(1));
        assert_eq!(analysis.innermost_loop(2), Some(1));
        assert_eq!(analysis.innermost_loop(5), None);
        assert_eq!(analysis.loop_end(1), Some(2));
        assert_eq!(analysis.parent_loop(1), None);
        assert_eq!(analysis.loop_headers(), vec![1]);
    }

    #[test]
    fn test_nested_loops() {
        // 0: LdaZero
        // 1: StackCheck
        // 2: JumpLoop -1, 1  -> 1   inner
        // 5: JumpLoop -5, 0  -> 0   outer
        // 8: Return
        let analysis = analyze(vec![
            Opcode::LdaZero.to_byte(),
            Opcode::StackCheck.to_byte(),
            Opcode::JumpLoop.to_byte(),
            (-1i8) as u8,
            1,
            Opcode::JumpLoop.to_byte(),
            (-5i8) as u8,
            0,
            Opcode::Return.to_byte(),
        ]);

        assert_eq!(analysis.innermost_loop(0), Some(0));
        assert_eq!(analysis.innermost_loop(1), Some(1));
        assert_eq!(analysis.innermost_loop(2), Some(1));
        assert_eq!(analysis.innermost_loop(5), Some(0));
        assert_eq!(analysis.innermost_loop(8), None);
        assert_eq!(analysis.parent_loop(1), Some(0));
        assert_eq!(analysis.parent_loop(0), None);
        assert_eq!(analysis.depth_at(2), 2);
        assert_eq!(analysis.depth_at(5), 1);
        assert_eq!(analysis.depth_at(8), 0);
    }

    #[test]
    fn test_loop_with_two_back_edges() {
        // 0: LdaZero
        // 1: JumpLoop -1, 0 -> 0
        // 4: JumpLoop -4, 0 -> 0
        // 7: Return
        let analysis = analyze(vec![
            Opcode::LdaZero.to_byte(),
            Opcode::JumpLoop.to_byte(),
            (-1i8) as u8,
            0,
            Opcode::JumpLoop.to_byte(),
            (-4i8) as u8,
            0,
            Opcode::Return.to_byte(),
        ]);

        assert_eq!(analysis.branches().back_edges_to(0), &[1, 4]);
        assert_eq!(analysis.innermost_loop(4), Some(0));
        assert_eq!(analysis.innermost_loop(5), Some(0));
        assert_eq!(analysis.innermost_loop(7), None);
        assert_eq!(analysis.loop_end(0), Some(4));
    }

    #[test]
    fn test_no_loops() {
        let analysis = analyze(vec![
            Opcode::LdaZero.to_byte(),
            Opcode::Jump.to_byte(),
            3,
            Opcode::LdaZero.to_byte(),
            Opcode::Return.to_byte(),
        ]);
        assert!(analysis.loop_headers().is_empty());
        assert_eq!(analysis.innermost_loop(4), None);
        assert_eq!(analysis.depth_at(0), 0);
    }
}
