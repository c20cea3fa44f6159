//! Bytecode array builder: instruction encoding, labels and jump patching

use rustc_hash::FxHashMap;
use tern_vm_bytecode::operand::FIXED_FRAME_SLOTS;
use tern_vm_bytecode::{
    BytecodeArray, BytecodeIterator, CatchPrediction, Constant, ConstantPool, HandlerRange,
    HandlerTable, IntrinsicId, OperandScale, OperandType, Opcode, Register, RegisterList,
    RuntimeFunction, SourcePositionEntry, SourcePositionTable,
};

use crate::context::CompilationContext;
use crate::labels::{BytecodeLabel, LabelId, LabelSite, LabelState};

/// Encodes instructions into a byte stream and resolves labels.
///
/// Every instruction gets the narrowest operand scale that holds all of its
/// scalable operands. Forward jumps reserve a constant pool slot up front and
/// pick their scale from that index; at bind time the delta is patched in
/// place when it fits, otherwise it moves to the reserved slot and the jump
/// becomes its `...Constant` twin.
///
/// After `Return`, `Throw`, `ReThrow` or an unconditional jump, emission is
/// dropped until the next label or handler is bound.
#[derive(Debug)]
pub struct BytecodeArrayBuilder {
    bytes: Vec<u8>,
    constant_pool: ConstantPool,
    handler_table: HandlerTable,
    source_positions: SourcePositionTable,
    record_source_positions: bool,
    pending_position: Option<SourcePositionEntry>,
    labels: FxHashMap<LabelId, LabelState>,
    parameter_count: u32,
    feedback_slots: u32,
    reachable: bool,
    last_star: Option<Register>,
}

impl BytecodeArrayBuilder {
    /// Builder for a function with `parameter_count` parameters (receiver included)
    pub fn new(parameter_count: u32, record_source_positions: bool) -> Self {
        Self {
            bytes: Vec::new(),
            constant_pool: ConstantPool::new(),
            handler_table: HandlerTable::new(),
            source_positions: SourcePositionTable::new(),
            record_source_positions,
            pending_position: None,
            labels: FxHashMap::default(),
            parameter_count,
            feedback_slots: 0,
            reachable: true,
            last_star: None,
        }
    }

    /// Offset the next instruction will be emitted at
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.bytes.len()
    }

    /// Whether emitted code is reachable
    #[inline]
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Parameter count including the receiver
    #[inline]
    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    /// The constant pool under construction
    pub fn constant_pool(&mut self) -> &mut ConstantPool {
        &mut self.constant_pool
    }

    /// Allocate a feedback slot
    pub fn new_feedback_slot(&mut self) -> u32 {
        let slot = self.feedback_slots;
        self.feedback_slots += 1;
        slot
    }

    // ==================== Encoding ====================

    fn scale_for(opcode: Opcode, operands: &[u32]) -> OperandScale {
        opcode
            .operand_types()
            .iter()
            .zip(operands)
            .filter(|(ty, _)| ty.is_scalable())
            .map(|(ty, value)| {
                if ty.is_signed() {
                    OperandScale::for_signed(*value as i32 as i64)
                } else {
                    OperandScale::for_unsigned(*value as u64)
                }
            })
            .max()
            .unwrap_or(OperandScale::Single)
    }

    fn write_operand(&mut self, ty: OperandType, scale: OperandScale, value: u32) {
        let width = ty.size(scale).bytes();
        self.bytes.extend_from_slice(&value.to_le_bytes()[..width]);
    }

    fn attach_source_position(&mut self) {
        if let Some(mut entry) = self.pending_position.take() {
            entry.bytecode_offset = self.bytes.len() as u32;
            self.source_positions.push(entry);
        }
    }

    /// Emit `opcode` with raw operand values.
    ///
    /// Signed operands are passed as `value as i32 as u32`.
    pub fn emit(&mut self, opcode: Opcode, operands: &[u32]) {
        assert_eq!(
            operands.len(),
            opcode.operand_count(),
            "{} takes {} operands",
            opcode.name(),
            opcode.operand_count()
        );
        debug_assert!(!opcode.is_prefix());
        if !self.reachable {
            self.pending_position = None;
            return;
        }

        let scale = Self::scale_for(opcode, operands);
        self.attach_source_position();
        if let Some(prefix) = Opcode::prefix_for_scale(scale) {
            self.bytes.push(prefix.to_byte());
        }
        self.bytes.push(opcode.to_byte());
        for (ty, value) in opcode.operand_types().iter().zip(operands) {
            self.write_operand(*ty, scale, *value);
        }
        self.after_emit(opcode, operands.first().copied());
    }

    fn after_emit(&mut self, opcode: Opcode, first_operand: Option<u32>) {
        self.last_star = match (opcode, first_operand) {
            (Opcode::Star, Some(register)) => Some(Register(register as i32)),
            _ => None,
        };
        if opcode.is_terminator() {
            self.reachable = false;
        }
    }

    // ==================== Source positions ====================

    /// Attach a statement position to the next instruction
    pub fn set_statement_position(&mut self, position: u32) {
        if self.record_source_positions {
            self.pending_position = Some(SourcePositionEntry {
                bytecode_offset: 0,
                source_position: position,
                is_statement: true,
            });
        }
    }

    /// Attach an expression position to the next instruction unless a
    /// statement position is already waiting
    pub fn set_expression_position(&mut self, position: u32) {
        if !self.record_source_positions {
            return;
        }
        if !matches!(self.pending_position, Some(entry) if entry.is_statement) {
            self.pending_position = Some(SourcePositionEntry {
                bytecode_offset: 0,
                source_position: position,
                is_statement: false,
            });
        }
    }

    // ==================== Labels and jumps ====================

    /// Create a label tracked by this builder
    pub fn new_label(&mut self, ctx: &mut CompilationContext) -> BytecodeLabel {
        let label = ctx.new_label();
        self.labels.insert(label.id(), LabelState::Unbound(Vec::new()));
        label
    }

    fn label_state(&mut self, label: BytecodeLabel) -> &mut LabelState {
        match self.labels.get_mut(&label.id()) {
            Some(state) => state,
            None => panic!("label {:?} was not created by this builder", label.id()),
        }
    }

    /// Whether `label` has been bound
    pub fn is_bound(&self, label: BytecodeLabel) -> bool {
        matches!(self.labels.get(&label.id()), Some(LabelState::Bound(_)))
    }

    /// Bind `label` to the current offset and patch every site waiting on it.
    ///
    /// # Panics
    ///
    /// Panics if the label is already bound.
    pub fn bind(&mut self, label: BytecodeLabel) {
        let offset = self.current_offset();
        let state = self.label_state(label);
        let sites = match std::mem::replace(state, LabelState::Bound(offset)) {
            LabelState::Unbound(sites) => sites,
            LabelState::Bound(previous) => {
                panic!("label {:?} bound twice (at {} and {})", label.id(), previous, offset)
            }
        };
        tracing::trace!(
            target: "tern::builder",
            label = label.id().0,
            offset,
            sites = sites.len(),
            "bind label"
        );
        for site in sites {
            self.patch(site, offset);
        }
        self.reachable = true;
        self.last_star = None;
    }

    fn patch(&mut self, site: LabelSite, target: usize) {
        match site {
            LabelSite::Jump {
                instruction,
                opcode_at,
                scale,
                reservation,
            } => {
                let delta = target as i64 - instruction as i64;
                let width = scale.scalable_operand_size();
                let operand = opcode_at + 1;
                if width.fits_signed(delta) {
                    let encoded = (delta as i32).to_le_bytes();
                    self.bytes[operand..operand + width.bytes()]
                        .copy_from_slice(&encoded[..width.bytes()]);
                    self.constant_pool.discard_reserved(reservation);
                } else {
                    self.constant_pool
                        .commit_reserved(reservation, Constant::JumpOffset(delta as i32));
                    let encoded = reservation.to_le_bytes();
                    self.bytes[operand..operand + width.bytes()]
                        .copy_from_slice(&encoded[..width.bytes()]);
                    let twin = Opcode::from_byte(self.bytes[opcode_at])
                        .and_then(Opcode::to_constant_jump);
                    match twin {
                        Some(twin) => self.bytes[opcode_at] = twin.to_byte(),
                        None => panic!("jump site at {} is not an immediate jump", instruction),
                    }
                    tracing::trace!(
                        target: "tern::builder",
                        instruction,
                        delta,
                        constant = reservation,
                        "jump delta moved to constant pool"
                    );
                }
            }
            LabelSite::TableEntry { switch_at, index } => {
                let delta = target as i64 - switch_at as i64;
                self.constant_pool
                    .commit_reserved(index, Constant::JumpOffset(delta as i32));
            }
        }
    }

    /// Emit a jump (`Jump` or a conditional immediate jump) to `label`
    pub fn jump_to(&mut self, opcode: Opcode, label: BytecodeLabel) {
        assert!(
            opcode.is_jump_immediate() && opcode != Opcode::JumpLoop,
            "{} is not a forward jump",
            opcode.name()
        );
        if !self.reachable {
            self.pending_position = None;
            return;
        }
        if let LabelState::Bound(target) = *self.label_state(label) {
            let delta = target as i64 - self.current_offset() as i64;
            self.emit(opcode, &[delta as i32 as u32]);
            return;
        }

        let reservation = self.constant_pool.reserve();
        let scale = OperandScale::for_unsigned(reservation as u64);
        self.attach_source_position();
        let instruction = self.current_offset();
        if let Some(prefix) = Opcode::prefix_for_scale(scale) {
            self.bytes.push(prefix.to_byte());
        }
        let opcode_at = self.current_offset();
        self.bytes.push(opcode.to_byte());
        self.write_operand(OperandType::Imm, scale, 0);

        let site = LabelSite::Jump {
            instruction,
            opcode_at,
            scale,
            reservation,
        };
        if let LabelState::Unbound(sites) = self.label_state(label) {
            sites.push(site);
        }
        self.after_emit(opcode, None);
    }

    /// `Jump` to `label`
    pub fn jump(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::Jump, label);
    }

    /// `JumpIfTrue` to `label`
    pub fn jump_if_true(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::JumpIfTrue, label);
    }

    /// `JumpIfFalse` to `label`
    pub fn jump_if_false(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::JumpIfFalse, label);
    }

    /// `JumpIfToBooleanTrue` to `label`
    pub fn jump_if_to_boolean_true(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::JumpIfToBooleanTrue, label);
    }

    /// `JumpIfToBooleanFalse` to `label`
    pub fn jump_if_to_boolean_false(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::JumpIfToBooleanFalse, label);
    }

    /// `JumpIfNotUndefinedOrNull` to `label`
    pub fn jump_if_not_undefined_or_null(&mut self, label: BytecodeLabel) {
        self.jump_to(Opcode::JumpIfNotUndefinedOrNull, label);
    }

    /// Back-edge to a bound loop header
    pub fn jump_loop(&mut self, header: BytecodeLabel, loop_depth: u32) {
        let LabelState::Bound(target) = *self.label_state(header) else {
            panic!("loop header {:?} is not bound", header.id());
        };
        let delta = target as i64 - self.current_offset() as i64;
        self.emit(Opcode::JumpLoop, &[delta as i32 as u32, loop_depth]);
    }

    /// Multi-way jump on the Smi in the accumulator: value
    /// `case_value_base + i` continues at `targets[i]`; anything else falls
    /// through.
    pub fn switch_on_smi(&mut self, case_value_base: i32, targets: &[BytecodeLabel]) {
        if !self.reachable {
            return;
        }
        let table_start = self.constant_pool.reserve_range(targets.len() as u32);
        let switch_at = self.current_offset();
        self.emit(
            Opcode::SwitchOnSmiNoFeedback,
            &[table_start, targets.len() as u32, case_value_base as u32],
        );
        for (i, label) in targets.iter().enumerate() {
            let index = table_start + i as u32;
            match self.labels.get_mut(&label.id()) {
                Some(LabelState::Bound(target)) => {
                    let delta = *target as i64 - switch_at as i64;
                    self.constant_pool
                        .commit_reserved(index, Constant::JumpOffset(delta as i32));
                }
                Some(LabelState::Unbound(sites)) => {
                    sites.push(LabelSite::TableEntry { switch_at, index })
                }
                None => panic!("label {:?} was not created by this builder", label.id()),
            }
        }
    }

    // ==================== Exception handlers ====================

    /// Open a handler table entry, returns its index
    pub fn new_handler_entry(&mut self) -> usize {
        self.handler_table.push(HandlerRange {
            start: 0,
            end: 0,
            handler_offset: 0,
            data: 0,
            prediction: CatchPrediction::Caught,
        })
    }

    fn handler_entry(&mut self, index: usize) -> &mut HandlerRange {
        match self.handler_table.get_mut(index) {
            Some(range) => range,
            None => panic!("no handler table entry {}", index),
        }
    }

    /// Start of the protected range; `context` holds the context to restore
    pub fn mark_try_begin(&mut self, index: usize, context: Register) {
        let offset = self.current_offset() as u32;
        let range = self.handler_entry(index);
        range.start = offset;
        range.data = context.index();
    }

    /// End of the protected range
    pub fn mark_try_end(&mut self, index: usize) {
        let offset = self.current_offset() as u32;
        self.handler_entry(index).end = offset;
    }

    /// Handler entry point; the exception arrives in the accumulator
    pub fn mark_handler(&mut self, index: usize, prediction: CatchPrediction) {
        let offset = self.current_offset() as u32;
        let range = self.handler_entry(index);
        range.handler_offset = offset;
        range.prediction = prediction;
        self.reachable = true;
        self.last_star = None;
    }

    // ==================== Accumulator and registers ====================

    /// acc = value, as `LdaZero` or `LdaSmi`
    pub fn load_literal_smi(&mut self, value: i32) {
        if value == 0 {
            self.emit(Opcode::LdaZero, &[]);
        } else {
            self.emit(Opcode::LdaSmi, &[value as u32]);
        }
    }

    /// acc = constants\[index\]
    pub fn load_constant_pool_entry(&mut self, index: u32) {
        self.emit(Opcode::LdaConstant, &[index]);
    }

    /// acc = undefined
    pub fn load_undefined(&mut self) {
        self.emit(Opcode::LdaUndefined, &[]);
    }

    /// acc = null
    pub fn load_null(&mut self) {
        self.emit(Opcode::LdaNull, &[]);
    }

    /// acc = the hole
    pub fn load_the_hole(&mut self) {
        self.emit(Opcode::LdaTheHole, &[]);
    }

    /// acc = true / false
    pub fn load_boolean(&mut self, value: bool) {
        self.emit(if value { Opcode::LdaTrue } else { Opcode::LdaFalse }, &[]);
    }

    /// acc = register; dropped right after `Star` of the same register
    pub fn load_accumulator_with_register(&mut self, register: Register) {
        if self.reachable && self.last_star == Some(register) {
            return;
        }
        self.emit(Opcode::Ldar, &[register.index() as u32]);
    }

    /// register = acc
    pub fn store_accumulator_in_register(&mut self, register: Register) {
        self.emit(Opcode::Star, &[register.index() as u32]);
    }

    /// to = from
    pub fn move_register(&mut self, from: Register, to: Register) {
        if from != to {
            self.emit(Opcode::Mov, &[from.index() as u32, to.index() as u32]);
        }
    }

    // ==================== Variables ====================

    /// acc = global\[name\]
    pub fn load_global(&mut self, name: u32, slot: u32, inside_typeof: bool) {
        let opcode = if inside_typeof {
            Opcode::LdaGlobalInsideTypeof
        } else {
            Opcode::LdaGlobal
        };
        self.emit(opcode, &[name, slot]);
    }

    /// global\[name\] = acc
    pub fn store_global(&mut self, name: u32, slot: u32) {
        self.emit(Opcode::StaGlobal, &[name, slot]);
    }

    /// acc = slot of the context `depth` levels out from `context`
    pub fn load_context_slot(&mut self, context: Register, slot: u32, depth: u32) {
        if context == Register::current_context() && depth == 0 {
            self.emit(Opcode::LdaCurrentContextSlot, &[slot]);
        } else {
            self.emit(Opcode::LdaContextSlot, &[context.index() as u32, slot, depth]);
        }
    }

    /// slot of the context `depth` levels out from `context` = acc
    pub fn store_context_slot(&mut self, context: Register, slot: u32, depth: u32) {
        if context == Register::current_context() && depth == 0 {
            self.emit(Opcode::StaCurrentContextSlot, &[slot]);
        } else {
            self.emit(Opcode::StaContextSlot, &[context.index() as u32, slot, depth]);
        }
    }

    /// acc = dynamic lookup of name
    pub fn load_lookup_slot(&mut self, name: u32, inside_typeof: bool) {
        let opcode = if inside_typeof {
            Opcode::LdaLookupSlotInsideTypeof
        } else {
            Opcode::LdaLookupSlot
        };
        self.emit(opcode, &[name]);
    }

    /// dynamic store of acc to name
    pub fn store_lookup_slot(&mut self, name: u32, strict: bool) {
        self.emit(Opcode::StaLookupSlot, &[name, strict as u32]);
    }

    /// save = current context; current context = acc
    pub fn push_context(&mut self, save: Register) {
        self.emit(Opcode::PushContext, &[save.index() as u32]);
    }

    /// current context = context
    pub fn pop_context(&mut self, context: Register) {
        self.emit(Opcode::PopContext, &[context.index() as u32]);
    }

    /// Throw a ReferenceError for `name` if acc is the hole
    pub fn throw_reference_error_if_hole(&mut self, name: u32) {
        self.emit(Opcode::ThrowReferenceErrorIfHole, &[name]);
    }

    // ==================== Properties ====================

    /// acc = object.name
    pub fn load_named_property(&mut self, object: Register, name: u32, slot: u32) {
        self.emit(Opcode::GetNamedProperty, &[object.index() as u32, name, slot]);
    }

    /// acc = object\[acc\]
    pub fn load_keyed_property(&mut self, object: Register, slot: u32) {
        self.emit(Opcode::GetKeyedProperty, &[object.index() as u32, slot]);
    }

    /// object.name = acc
    pub fn store_named_property(&mut self, object: Register, name: u32, slot: u32) {
        self.emit(Opcode::SetNamedProperty, &[object.index() as u32, name, slot]);
    }

    /// object\[key\] = acc
    pub fn store_keyed_property(&mut self, object: Register, key: Register, slot: u32) {
        self.emit(
            Opcode::SetKeyedProperty,
            &[object.index() as u32, key.index() as u32, slot],
        );
    }

    // ==================== Operators ====================

    /// acc = left op acc, for binary and compare opcodes
    pub fn binary_operation(&mut self, opcode: Opcode, left: Register, slot: u32) {
        debug_assert_eq!(opcode.operand_types(), &[OperandType::Reg, OperandType::Slot]);
        self.emit(opcode, &[left.index() as u32, slot]);
    }

    /// acc = acc + value
    pub fn add_smi(&mut self, value: i32, slot: u32) {
        self.emit(Opcode::AddSmi, &[value as u32, slot]);
    }

    /// Unary operation with feedback (`Inc`, `Dec`, `Negate`, ...)
    pub fn unary_operation(&mut self, opcode: Opcode, slot: u32) {
        debug_assert_eq!(opcode.operand_types(), &[OperandType::Slot]);
        self.emit(opcode, &[slot]);
    }

    /// acc = !acc; `LogicalNot` when acc is known to be boolean
    pub fn logical_not(&mut self, known_boolean: bool) {
        let opcode = if known_boolean {
            Opcode::LogicalNot
        } else {
            Opcode::ToBooleanLogicalNot
        };
        self.emit(opcode, &[]);
    }

    /// acc = typeof acc
    pub fn type_of(&mut self) {
        self.emit(Opcode::TypeOf, &[]);
    }

    // ==================== Allocation ====================

    /// acc = closure for shared function constants\[index\]
    pub fn create_closure(&mut self, index: u32, slot: u32, flags: u8) {
        self.emit(Opcode::CreateClosure, &[index, slot, flags as u32]);
    }

    /// acc = object literal from boilerplate constants\[index\]
    pub fn create_object_literal(&mut self, index: u32, slot: u32, flags: u8) {
        self.emit(Opcode::CreateObjectLiteral, &[index, slot, flags as u32]);
    }

    /// acc = array literal from boilerplate constants\[index\]
    pub fn create_array_literal(&mut self, index: u32, slot: u32, flags: u8) {
        self.emit(Opcode::CreateArrayLiteral, &[index, slot, flags as u32]);
    }

    /// acc = function context for scope constants\[scope\]
    pub fn create_function_context(&mut self, scope: u32, slot_count: u32) {
        self.emit(Opcode::CreateFunctionContext, &[scope, slot_count]);
    }

    /// acc = block context for scope constants\[scope\]
    pub fn create_block_context(&mut self, scope: u32) {
        self.emit(Opcode::CreateBlockContext, &[scope]);
    }

    /// acc = catch context binding `exception`
    pub fn create_catch_context(&mut self, exception: Register, scope: u32) {
        self.emit(Opcode::CreateCatchContext, &[exception.index() as u32, scope]);
    }

    // ==================== Calls ====================

    fn call(&mut self, opcode: Opcode, callee: Register, args: RegisterList, slot: u32) {
        self.emit(
            opcode,
            &[callee.index() as u32, args.first().index() as u32, args.count(), slot],
        );
    }

    /// acc = callee.call(args\[0\], args\[1..\])
    pub fn call_property(&mut self, callee: Register, args: RegisterList, slot: u32) {
        self.call(Opcode::CallProperty, callee, args, slot);
    }

    /// acc = callee(args...) with undefined receiver
    pub fn call_undefined_receiver(&mut self, callee: Register, args: RegisterList, slot: u32) {
        self.call(Opcode::CallUndefinedReceiver, callee, args, slot);
    }

    /// acc = new callee(args...), new.target taken from acc
    pub fn construct(&mut self, callee: Register, args: RegisterList, slot: u32) {
        self.call(Opcode::Construct, callee, args, slot);
    }

    /// acc = runtime function(args...)
    pub fn call_runtime(&mut self, function: RuntimeFunction, args: RegisterList) {
        self.emit(
            Opcode::CallRuntime,
            &[function.id() as u32, args.first().index() as u32, args.count()],
        );
    }

    /// acc = intrinsic(args...)
    pub fn invoke_intrinsic(&mut self, intrinsic: IntrinsicId, args: RegisterList) {
        self.emit(
            Opcode::InvokeIntrinsic,
            &[intrinsic.id() as u32, args.first().index() as u32, args.count()],
        );
    }

    // ==================== Exits ====================

    /// throw acc
    pub fn throw(&mut self) {
        self.emit(Opcode::Throw, &[]);
    }

    /// rethrow acc
    pub fn rethrow(&mut self) {
        self.emit(Opcode::ReThrow, &[]);
    }

    /// return acc
    pub fn return_(&mut self) {
        self.emit(Opcode::Return, &[]);
    }

    /// Stack guard
    pub fn stack_check(&mut self) {
        self.emit(Opcode::StackCheck, &[]);
    }

    /// `debugger`
    pub fn debugger(&mut self) {
        self.emit(Opcode::Debugger, &[]);
    }

    // ==================== Finalization ====================

    fn check_register_operands(&self, frame_size: u32) {
        let lowest = -(FIXED_FRAME_SLOTS + self.parameter_count as i32);
        let in_frame = |register: Register| register.index() >= lowest && register.index() < frame_size as i32;
        for instruction in BytecodeIterator::new(&self.bytes) {
            let instruction = match instruction {
                Ok(instruction) => instruction,
                Err(err) => panic!("builder produced undecodable bytecode: {}", err),
            };
            for (i, ty) in instruction.opcode().operand_types().iter().enumerate() {
                match ty {
                    OperandType::Reg | OperandType::RegOut => {
                        let register = instruction.register_operand(i);
                        assert!(in_frame(register), "{} outside frame at {}", register, instruction.offset());
                    }
                    OperandType::RegList => {
                        let list = instruction.register_list_operand(i);
                        if let Some(last) = list.last() {
                            let first = list.first();
                            assert!(in_frame(first), "{} outside frame at {}", first, instruction.offset());
                            assert!(in_frame(last), "{} outside frame at {}", last, instruction.offset());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Finish the array.
    ///
    /// Register operands are range checked here, once, in every build
    /// profile. The verifier does not repeat the check, so arrays loaded with
    /// `Script::from_bytes` get their control flow re-verified but not their
    /// register operands.
    ///
    /// # Panics
    ///
    /// Panics if a label was never bound, a constant pool reservation is
    /// still outstanding, or a register operand lies outside the frame of
    /// `frame_size` registers, the fixed slots and the parameters.
    pub fn to_bytecode_array(self, frame_size: u32) -> BytecodeArray {
        let unbound = self
            .labels
            .iter()
            .filter(|(_, state)| matches!(state, LabelState::Unbound(_)))
            .map(|(id, _)| *id)
            .min();
        if let Some(id) = unbound {
            panic!("label {:?} was never bound", id);
        }
        assert_eq!(
            self.constant_pool.reserved_count(),
            0,
            "constant pool has outstanding reservations"
        );
        self.check_register_operands(frame_size);

        BytecodeArray::new(
            self.bytes,
            self.constant_pool,
            self.handler_table,
            frame_size,
            self.parameter_count,
        )
        .with_source_positions(self.source_positions)
        .with_feedback_slot_count(self.feedback_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_vm_bytecode::{VerificationMode, Verifier};

    fn builder() -> (BytecodeArrayBuilder, CompilationContext) {
        (BytecodeArrayBuilder::new(1, true), CompilationContext::new())
    }

    #[test]
    fn test_scale_selection() {
        let (mut b, _) = builder();
        b.load_literal_smi(5);
        b.load_literal_smi(300);
        b.load_literal_smi(-100_000);
        b.return_();
        let array = b.to_bytecode_array(0);
        let instructions: Vec<_> = array.iter().map(|i| i.unwrap()).collect();
        assert_eq!(instructions[0].scale(), OperandScale::Single);
        assert_eq!(instructions[1].scale(), OperandScale::Double);
        assert_eq!(instructions[1].signed_operand(0), 300);
        assert_eq!(instructions[2].scale(), OperandScale::Quadruple);
        assert_eq!(instructions[2].signed_operand(0), -100_000);
    }

    #[test]
    fn test_forward_jump_patched_in_place() {
        let (mut b, mut ctx) = builder();
        let label = b.new_label(&mut ctx);
        b.load_boolean(true);
        b.jump_if_false(label);
        b.load_literal_smi(1);
        b.bind(label);
        b.return_();
        let array = b.to_bytecode_array(0);

        assert!(array.constant_pool().is_empty());
        assert_eq!(
            array.bytes(),
            &[
                Opcode::LdaTrue as u8,
                Opcode::JumpIfFalse as u8,
                4,
                Opcode::LdaSmi as u8,
                1,
                Opcode::Return as u8
            ]
        );
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_far_jump_moves_to_constant_pool() {
        let (mut b, mut ctx) = builder();
        let label = b.new_label(&mut ctx);
        b.load_boolean(true);
        b.jump_if_true(label);
        for _ in 0..100 {
            b.load_literal_smi(1);
        }
        b.bind(label);
        b.return_();
        let array = b.to_bytecode_array(0);

        let jump = array.iter().nth(1).unwrap().unwrap();
        assert_eq!(jump.opcode(), Opcode::JumpIfTrueConstant);
        assert_eq!(array.constant_pool().get(0), Some(&Constant::JumpOffset(202)));
        assert_eq!(jump.jump_target(array.constant_pool()), Ok(203));
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_discarded_reservation_leaves_hole() {
        let (mut b, mut ctx) = builder();
        let near = b.new_label(&mut ctx);
        let far = b.new_label(&mut ctx);
        b.load_boolean(true);
        b.jump_if_true(far); // reserves constant 0
        b.jump_if_false(near); // reserves constant 1
        let name = b.constant_pool().add_string("x");
        b.load_constant_pool_entry(name);
        b.bind(near);
        for _ in 0..70 {
            b.load_literal_smi(2);
        }
        b.bind(far);
        b.return_();
        let array = b.to_bytecode_array(0);

        assert_eq!(array.constant_pool().get(1), Some(&Constant::Hole));
        assert!(matches!(array.constant_pool().get(0), Some(Constant::JumpOffset(_))));
        assert!(array.constant_pool().get(2).and_then(Constant::as_string).is_some());
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_jump_loop_is_backward() {
        let (mut b, mut ctx) = builder();
        let header = b.new_label(&mut ctx);
        b.load_literal_smi(0);
        b.bind(header);
        b.stack_check();
        b.jump_loop(header, 0);
        let exit = b.new_label(&mut ctx);
        b.bind(exit);
        b.return_();
        let array = b.to_bytecode_array(0);
        let back = array.iter().nth(2).unwrap().unwrap();
        assert_eq!(back.opcode(), Opcode::JumpLoop);
        assert_eq!(back.jump_target(array.constant_pool()), Ok(1));
    }

    #[test]
    fn test_dead_code_is_dropped_until_bind() {
        let (mut b, mut ctx) = builder();
        let label = b.new_label(&mut ctx);
        b.load_undefined();
        b.return_();
        b.load_literal_smi(7);
        b.jump(label);
        assert!(!b.is_reachable());
        b.bind(label);
        b.load_null();
        b.return_();
        let array = b.to_bytecode_array(0);
        assert_eq!(
            array.bytes(),
            &[
                Opcode::LdaUndefined as u8,
                Opcode::Return as u8,
                Opcode::LdaNull as u8,
                Opcode::Return as u8
            ]
        );
        assert!(array.constant_pool().is_empty());
    }

    #[test]
    fn test_star_ldar_elision() {
        let (mut b, mut ctx) = builder();
        b.load_literal_smi(1);
        b.store_accumulator_in_register(Register(0));
        b.load_accumulator_with_register(Register(0));
        let label = b.new_label(&mut ctx);
        b.bind(label);
        b.load_accumulator_with_register(Register(0));
        b.return_();
        let array = b.to_bytecode_array(1);
        let opcodes: Vec<_> = array.iter().map(|i| i.unwrap().opcode()).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::LdaSmi, Opcode::Star, Opcode::Ldar, Opcode::Return]
        );
    }

    #[test]
    fn test_switch_table() {
        let (mut b, mut ctx) = builder();
        let cases = [b.new_label(&mut ctx), b.new_label(&mut ctx)];
        b.load_literal_smi(3);
        b.switch_on_smi(3, &cases);
        b.load_undefined();
        b.return_();
        b.bind(cases[0]);
        b.load_literal_smi(10);
        b.return_();
        b.bind(cases[1]);
        b.load_literal_smi(20);
        b.return_();
        let array = b.to_bytecode_array(0);

        let switch = array.iter().nth(1).unwrap().unwrap();
        let targets = switch.switch_targets(array.constant_pool()).unwrap();
        assert_eq!(targets, vec![(3, 8), (4, 11)]);
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    fn test_source_positions() {
        let (mut b, _) = builder();
        b.set_statement_position(10);
        b.set_expression_position(12);
        b.load_undefined();
        b.set_expression_position(14);
        b.return_();
        let array = b.to_bytecode_array(0);
        let entries: Vec<_> = array.source_positions().iter().copied().collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_statement);
        assert_eq!(entries[0].source_position, 10);
        assert_eq!(entries[1].bytecode_offset, 1);
    }

    #[test]
    fn test_handler_entry() {
        let (mut b, mut ctx) = builder();
        let done = b.new_label(&mut ctx);
        let handler = b.new_handler_entry();
        b.mark_try_begin(handler, Register(0));
        b.load_undefined();
        b.throw();
        b.mark_try_end(handler);
        b.jump(done);
        b.mark_handler(handler, CatchPrediction::Caught);
        b.store_accumulator_in_register(Register(1));
        b.bind(done);
        b.load_undefined();
        b.return_();
        let array = b.to_bytecode_array(2);

        let range = array.handler_table().get(0).copied().unwrap();
        assert_eq!((range.start, range.end, range.handler_offset, range.data), (0, 2, 2, 0));
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
    }

    #[test]
    #[should_panic(expected = "never bound")]
    fn test_unbound_label_panics() {
        let (mut b, mut ctx) = builder();
        let label = b.new_label(&mut ctx);
        b.jump(label);
        let _ = b.to_bytecode_array(0);
    }

    #[test]
    fn test_register_operands_inside_frame() {
        let (mut b, _) = builder();
        b.load_accumulator_with_register(Register(-4));
        b.store_accumulator_in_register(Register(1));
        b.return_();
        let array = b.to_bytecode_array(2);
        assert_eq!(array.frame_size(), 2);
    }

    #[test]
    #[should_panic(expected = "outside frame")]
    fn test_register_operand_past_frame_panics() {
        let (mut b, _) = builder();
        b.load_literal_smi(1);
        b.store_accumulator_in_register(Register(2));
        b.return_();
        let _ = b.to_bytecode_array(2);
    }

    #[test]
    #[should_panic(expected = "outside frame")]
    fn test_register_operand_below_parameters_panics() {
        let (mut b, _) = builder();
        b.load_accumulator_with_register(Register(-5));
        b.return_();
        let _ = b.to_bytecode_array(0);
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn test_double_bind_panics() {
        let (mut b, mut ctx) = builder();
        let label = b.new_label(&mut ctx);
        b.bind(label);
        b.bind(label);
    }
}
