//! Break/continue plumbing for loops and switches
//!
//! A `break` is visited before the code it jumps to exists, so each one emits
//! a jump to a fresh label and parks that label on a pending list. The owning
//! construct binds the whole list once its target location is emitted.

use tern_vm_bytecode::Opcode;

use crate::builder::BytecodeArrayBuilder;
use crate::context::CompilationContext;
use crate::labels::BytecodeLabel;

/// Labels waiting for one shared target
#[derive(Debug, Default)]
struct PendingJumps {
    labels: Vec<BytecodeLabel>,
}

impl PendingJumps {
    fn jump(
        &mut self,
        opcode: Opcode,
        builder: &mut BytecodeArrayBuilder,
        ctx: &mut CompilationContext,
    ) {
        let label = builder.new_label(ctx);
        builder.jump_to(opcode, label);
        self.labels.push(label);
    }

    fn bind_all(&mut self, builder: &mut BytecodeArrayBuilder) {
        for label in self.labels.drain(..) {
            builder.bind(label);
        }
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Control flow of one loop statement.
///
/// Emission order is fixed: [`loop_header`](Self::loop_header), the body
/// (with breaks and continues), [`set_continue_target`](Self::set_continue_target),
/// the update, [`jump_to_header`](Self::jump_to_header) and finally
/// [`set_break_target`](Self::set_break_target). Every `continue` lands on
/// the single latch, so each loop has exactly one back-edge.
///
/// Dropping a builder that still has pending breaks or continues panics.
#[derive(Debug)]
pub struct LoopBuilder {
    header: Option<BytecodeLabel>,
    breaks: PendingJumps,
    continues: PendingJumps,
    loop_depth: u32,
}

impl LoopBuilder {
    /// Builder for a loop nested `loop_depth` loops deep
    pub fn new(loop_depth: u32) -> Self {
        Self {
            header: None,
            breaks: PendingJumps::default(),
            continues: PendingJumps::default(),
            loop_depth,
        }
    }

    /// Nesting depth passed to `JumpLoop`
    pub fn loop_depth(&self) -> u32 {
        self.loop_depth
    }

    /// Bind the loop header at the current offset
    pub fn loop_header(&mut self, builder: &mut BytecodeArrayBuilder, ctx: &mut CompilationContext) {
        assert!(self.header.is_none(), "loop header emitted twice");
        let header = builder.new_label(ctx);
        builder.bind(header);
        self.header = Some(header);
    }

    /// Jump out of the loop
    pub fn break_(&mut self, builder: &mut BytecodeArrayBuilder, ctx: &mut CompilationContext) {
        self.breaks.jump(Opcode::Jump, builder, ctx);
    }

    /// Leave the loop when the accumulator is false. `to_boolean` selects the
    /// converting jump for values not known to be booleans.
    pub fn break_if_false(
        &mut self,
        builder: &mut BytecodeArrayBuilder,
        ctx: &mut CompilationContext,
        to_boolean: bool,
    ) {
        let opcode = if to_boolean {
            Opcode::JumpIfToBooleanFalse
        } else {
            Opcode::JumpIfFalse
        };
        self.breaks.jump(opcode, builder, ctx);
    }

    /// Jump to the latch
    pub fn continue_(&mut self, builder: &mut BytecodeArrayBuilder, ctx: &mut CompilationContext) {
        self.continues.jump(Opcode::Jump, builder, ctx);
    }

    /// Bind every pending continue at the current offset
    pub fn set_continue_target(&mut self, builder: &mut BytecodeArrayBuilder) {
        self.continues.bind_all(builder);
    }

    /// Emit the back-edge
    pub fn jump_to_header(&mut self, builder: &mut BytecodeArrayBuilder) {
        let Some(header) = self.header else {
            panic!("loop back-edge emitted before its header");
        };
        builder.jump_loop(header, self.loop_depth);
    }

    /// Bind every pending break at the current offset
    pub fn set_break_target(&mut self, builder: &mut BytecodeArrayBuilder) {
        self.breaks.bind_all(builder);
    }

    /// Pending (break, continue) counts
    pub fn pending(&self) -> (usize, usize) {
        (self.breaks.len(), self.continues.len())
    }

    /// Forget pending jumps when generation is abandoned with an error
    pub fn abandon(&mut self) {
        self.breaks.labels.clear();
        self.continues.labels.clear();
    }
}

impl Drop for LoopBuilder {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert_eq!(
                self.pending(),
                (0, 0),
                "loop builder dropped with unbound break/continue sites"
            );
        }
    }
}

/// Control flow of one switch statement: a label per case body plus
/// pending breaks.
#[derive(Debug)]
pub struct SwitchBuilder {
    cases: Vec<BytecodeLabel>,
    breaks: PendingJumps,
}

impl SwitchBuilder {
    /// Builder with one label per case clause
    pub fn new(
        builder: &mut BytecodeArrayBuilder,
        ctx: &mut CompilationContext,
        case_count: usize,
    ) -> Self {
        let cases = (0..case_count).map(|_| builder.new_label(ctx)).collect();
        Self {
            cases,
            breaks: PendingJumps::default(),
        }
    }

    /// Label of case `index`
    pub fn case_label(&self, index: usize) -> BytecodeLabel {
        self.cases[index]
    }

    /// Jump to case `index` when the accumulator is true
    pub fn jump_to_case_if_true(&mut self, builder: &mut BytecodeArrayBuilder, index: usize) {
        builder.jump_if_true(self.cases[index]);
    }

    /// Unconditional jump to case `index`
    pub fn jump_to_case(&mut self, builder: &mut BytecodeArrayBuilder, index: usize) {
        builder.jump(self.cases[index]);
    }

    /// Bind case `index` at the current offset
    pub fn set_case_target(&mut self, builder: &mut BytecodeArrayBuilder, index: usize) {
        builder.bind(self.cases[index]);
    }

    /// Jump out of the switch
    pub fn break_(&mut self, builder: &mut BytecodeArrayBuilder, ctx: &mut CompilationContext) {
        self.breaks.jump(Opcode::Jump, builder, ctx);
    }

    /// Bind every pending break at the current offset
    pub fn set_break_target(&mut self, builder: &mut BytecodeArrayBuilder) {
        self.breaks.bind_all(builder);
    }

    /// Pending break count
    pub fn pending(&self) -> usize {
        self.breaks.len()
    }

    /// Forget pending jumps when generation is abandoned with an error
    pub fn abandon(&mut self) {
        self.breaks.labels.clear();
    }
}

impl Drop for SwitchBuilder {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert_eq!(self.pending(), 0, "switch builder dropped with unbound break sites");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_vm_bytecode::{VerificationMode, Verifier};

    #[test]
    fn test_loop_builder_resolves_every_site() {
        let mut ctx = CompilationContext::new();
        let mut b = BytecodeArrayBuilder::new(1, false);
        let mut lp = LoopBuilder::new(0);

        lp.loop_header(&mut b, &mut ctx);
        b.load_boolean(true);
        lp.break_if_false(&mut b, &mut ctx, false);
        b.load_boolean(false);
        lp.continue_(&mut b, &mut ctx);
        assert_eq!(lp.pending(), (1, 1));
        assert!(!b.is_reachable());

        lp.set_continue_target(&mut b);
        assert!(b.is_reachable());
        lp.jump_to_header(&mut b);
        lp.set_break_target(&mut b);
        assert_eq!(lp.pending(), (0, 0));
        b.load_undefined();
        b.return_();

        let array = b.to_bytecode_array(0);
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_continues_share_single_back_edge() {
        let mut ctx = CompilationContext::new();
        let mut b = BytecodeArrayBuilder::new(1, false);
        let mut lp = LoopBuilder::new(0);

        lp.loop_header(&mut b, &mut ctx);
        b.load_boolean(true);
        lp.break_if_false(&mut b, &mut ctx, true);
        for value in [false, true] {
            let skip = b.new_label(&mut ctx);
            b.load_boolean(value);
            b.jump_if_false(skip);
            lp.continue_(&mut b, &mut ctx);
            b.bind(skip);
        }
        lp.set_continue_target(&mut b);
        lp.jump_to_header(&mut b);
        lp.set_break_target(&mut b);
        b.load_undefined();
        b.return_();

        let array = b.to_bytecode_array(0);
        let opcodes: Vec<_> = array.iter().map(|i| i.unwrap().opcode()).collect();
        assert_eq!(opcodes.iter().filter(|op| **op == Opcode::JumpLoop).count(), 1);
        // Both continues jump forward
        assert_eq!(opcodes.iter().filter(|op| **op == Opcode::Jump).count(), 2);
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_switch_builder() {
        let mut ctx = CompilationContext::new();
        let mut b = BytecodeArrayBuilder::new(1, false);
        let mut sw = SwitchBuilder::new(&mut b, &mut ctx, 2);

        b.load_boolean(true);
        sw.jump_to_case_if_true(&mut b, 1);
        sw.jump_to_case(&mut b, 0);
        sw.set_case_target(&mut b, 0);
        sw.break_(&mut b, &mut ctx);
        sw.set_case_target(&mut b, 1);
        b.load_literal_smi(1);
        sw.set_break_target(&mut b);
        b.return_();

        let array = b.to_bytecode_array(0);
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    #[should_panic(expected = "unbound break/continue")]
    fn test_pending_sites_on_drop_panic() {
        let mut ctx = CompilationContext::new();
        let mut b = BytecodeArrayBuilder::new(1, false);
        let mut lp = LoopBuilder::new(0);
        lp.loop_header(&mut b, &mut ctx);
        lp.break_(&mut b, &mut ctx);
    }

    #[test]
    fn test_abandon_allows_drop() {
        let mut ctx = CompilationContext::new();
        let mut b = BytecodeArrayBuilder::new(1, false);
        let mut lp = LoopBuilder::new(0);
        lp.loop_header(&mut b, &mut ctx);
        lp.break_(&mut b, &mut ctx);
        lp.abandon();
    }
}
