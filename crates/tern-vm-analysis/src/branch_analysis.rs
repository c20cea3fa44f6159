//! Jump edges of a finalized bytecode array, grouped by target

use rustc_hash::FxHashMap;
use tern_vm_bytecode::{BytecodeArray, VerifyError};

/// Every jump and switch edge of one array.
///
/// An edge is a back-edge when its target is at or before its source, a
/// forward edge otherwise. Sources are kept in stream order.
#[derive(Debug, Clone, Default)]
pub struct BranchAnalysis {
    back_edges: FxHashMap<usize, Vec<usize>>,
    forward_edges: FxHashMap<usize, Vec<usize>>,
}

impl BranchAnalysis {
    /// Scan `array` once.
    ///
    /// Never fails on an array that passed verification; other arrays report
    /// the first undecodable instruction or unresolvable target.
    pub fn analyze(array: &BytecodeArray) -> Result<Self, VerifyError> {
        let pool = array.constant_pool();
        let mut analysis = Self::default();

        for instruction in array.iter() {
            let instruction = instruction?;
            let source = instruction.offset();
            let opcode = instruction.opcode();
            if opcode.is_jump() {
                let target = instruction
                    .jump_target(pool)
                    .map_err(|err| VerifyError::from_target(source, err))?;
                analysis.add_edge(source, target)?;
            } else if opcode.is_switch() {
                let targets = instruction
                    .switch_targets(pool)
                    .map_err(|err| VerifyError::from_target(source, err))?;
                for (_, target) in targets {
                    analysis.add_edge(source, target)?;
                }
            }
        }

        tracing::trace!(
            target: "tern::analysis",
            back_edges = analysis.back_edge_count(),
            forward_edges = analysis.forward_edge_count(),
            "branch analysis"
        );
        Ok(analysis)
    }

    fn add_edge(&mut self, source: usize, target: i64) -> Result<(), VerifyError> {
        let Ok(target) = usize::try_from(target) else {
            return Err(VerifyError::TargetOutOfBounds {
                offset: source,
                target,
            });
        };
        let edges = if target <= source {
            &mut self.back_edges
        } else {
            &mut self.forward_edges
        };
        let sources = edges.entry(target).or_default();
        // A switch table may list the same target more than once
        if sources.last() != Some(&source) {
            sources.push(source);
        }
        Ok(())
    }

    /// Sources of back-edges targeting `offset`
    pub fn back_edges_to(&self, offset: usize) -> &[usize] {
        self.back_edges.get(&offset).map_or(&[], Vec::as_slice)
    }

    /// Sources of forward edges targeting `offset`
    pub fn forward_edges_to(&self, offset: usize) -> &[usize] {
        self.forward_edges.get(&offset).map_or(&[], Vec::as_slice)
    }

    /// Whether any back-edge targets `offset`
    #[inline]
    pub fn is_loop_header(&self, offset: usize) -> bool {
        self.back_edges.contains_key(&offset)
    }

    /// Every back-edge target, ascending
    pub fn loop_headers(&self) -> Vec<usize> {
        let mut headers: Vec<_> = self.back_edges.keys().copied().collect();
        headers.sort_unstable();
        headers
    }

    /// Number of back-edges
    pub fn back_edge_count(&self) -> usize {
        self.back_edges.values().map(Vec::len).sum()
    }

    /// Number of forward edges
    pub fn forward_edge_count(&self) -> usize {
        self.forward_edges.values().map(Vec::len).sum()
    }
}
