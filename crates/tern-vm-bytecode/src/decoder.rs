//! Instruction decoding over a raw byte stream
//!
//! Decoding never trusts the stream: invalid opcodes, dangling or needless
//! prefixes and truncated operands come back as [`BytecodeError`]s. Whatever
//! decodes has a dispatch handler.

use smallvec::SmallVec;

use crate::constant::{Constant, ConstantPool};
use crate::error::{BytecodeError, Result};
use crate::instruction::Opcode;
use crate::operand::{
    ConstantIndex, FeedbackSlot, OperandScale, OperandSize, OperandType, Register, RegisterList,
};
use crate::runtime::{IntrinsicId, RuntimeFunction};

/// Why a jump or switch target could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// Constant pool index past the end of the pool
    ConstantOutOfBounds(u32),
    /// Constant pool entry that does not hold a jump offset
    NotAJumpOffset(u32),
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    offset: usize,
    opcode: Opcode,
    scale: OperandScale,
    size: usize,
    operands: SmallVec<[u32; 4]>,
}

impl DecodedInstruction {
    /// Offset of the instruction's first byte (its prefix, if any)
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The opcode
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Operand scale
    #[inline]
    pub fn scale(&self) -> OperandScale {
        self.scale
    }

    /// Size in bytes, prefix included
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset of the following instruction
    #[inline]
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Number of operands
    #[inline]
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Raw operand bits; signed operands are sign-extended to 32 bits
    #[inline]
    pub fn raw_operand(&self, i: usize) -> u32 {
        self.operands[i]
    }

    /// Operand as a signed value
    #[inline]
    pub fn signed_operand(&self, i: usize) -> i32 {
        debug_assert!(self.opcode.operand_type(i).is_signed());
        self.operands[i] as i32
    }

    /// Operand as an unsigned value
    #[inline]
    pub fn unsigned_operand(&self, i: usize) -> u32 {
        debug_assert!(!self.opcode.operand_type(i).is_signed());
        self.operands[i]
    }

    /// Register operand
    #[inline]
    pub fn register_operand(&self, i: usize) -> Register {
        debug_assert!(self.opcode.operand_type(i).is_register());
        Register(self.operands[i] as i32)
    }

    /// Register list starting at operand `i` (count in operand `i + 1`)
    pub fn register_list_operand(&self, i: usize) -> RegisterList {
        debug_assert_eq!(self.opcode.operand_type(i), OperandType::RegList);
        RegisterList::new(Register(self.operands[i] as i32), self.operands[i + 1])
    }

    /// Constant pool index operand
    #[inline]
    pub fn constant_index(&self, i: usize) -> ConstantIndex {
        debug_assert_eq!(self.opcode.operand_type(i), OperandType::Idx);
        ConstantIndex(self.operands[i])
    }

    /// Feedback slot operand
    #[inline]
    pub fn feedback_slot(&self, i: usize) -> FeedbackSlot {
        debug_assert_eq!(self.opcode.operand_type(i), OperandType::Slot);
        FeedbackSlot(self.operands[i])
    }

    /// Runtime function named by a `RuntimeId` operand
    pub fn runtime_function(&self, i: usize) -> Option<RuntimeFunction> {
        RuntimeFunction::from_id(self.operands[i] as u16)
    }

    /// Intrinsic named by an `IntrinsicId` operand
    pub fn intrinsic(&self, i: usize) -> Option<IntrinsicId> {
        IntrinsicId::from_id(self.operands[i] as u8)
    }

    /// Relative delta of a jump instruction
    pub fn jump_delta(&self, pool: &ConstantPool) -> std::result::Result<i32, TargetError> {
        debug_assert!(self.opcode.is_jump());
        if self.opcode.is_jump_constant() {
            let idx = self.operands[0];
            match pool.get(idx) {
                None => Err(TargetError::ConstantOutOfBounds(idx)),
                Some(Constant::JumpOffset(delta)) => Ok(*delta),
                Some(_) => Err(TargetError::NotAJumpOffset(idx)),
            }
        } else {
            Ok(self.operands[0] as i32)
        }
    }

    /// Absolute target of a jump instruction. May lie outside the stream.
    pub fn jump_target(&self, pool: &ConstantPool) -> std::result::Result<i64, TargetError> {
        Ok(self.offset as i64 + self.jump_delta(pool)? as i64)
    }

    /// `(case value, absolute target)` pairs of a switch's jump table
    pub fn switch_targets(
        &self,
        pool: &ConstantPool,
    ) -> std::result::Result<Vec<(i64, i64)>, TargetError> {
        debug_assert!(self.opcode.is_switch());
        let table_start = self.operands[0] as u64;
        let table_length = self.operands[1] as u64;
        let case_base = self.operands[2] as i32 as i64;
        let mut targets = Vec::with_capacity(table_length.min(pool.len() as u64) as usize);
        for i in 0..table_length {
            let idx = table_start + i;
            let entry = u32::try_from(idx)
                .ok()
                .and_then(|idx| pool.get(idx))
                .ok_or(TargetError::ConstantOutOfBounds(idx.min(u32::MAX as u64) as u32))?;
            let delta = entry
                .as_jump_offset()
                .ok_or(TargetError::NotAJumpOffset(idx as u32))?;
            targets.push((case_base + i as i64, self.offset as i64 + delta as i64));
        }
        Ok(targets)
    }
}

fn read_operand(bytes: &[u8], at: usize, ty: OperandType, scale: OperandScale) -> u32 {
    match (ty.size(scale), ty.is_signed()) {
        (OperandSize::Byte, true) => bytes[at] as i8 as i32 as u32,
        (OperandSize::Byte, false) => bytes[at] as u32,
        (OperandSize::Short, true) => i16::from_le_bytes([bytes[at], bytes[at + 1]]) as i32 as u32,
        (OperandSize::Short, false) => u16::from_le_bytes([bytes[at], bytes[at + 1]]) as u32,
        (OperandSize::Quad, _) => {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        }
    }
}

/// Decode the instruction starting at `offset`.
pub fn decode_at(bytes: &[u8], offset: usize) -> Result<DecodedInstruction> {
    let first = *bytes.get(offset).ok_or(BytecodeError::UnexpectedEnd)?;
    let mut opcode = Opcode::from_byte(first).ok_or(BytecodeError::InvalidOpcode {
        opcode: first,
        offset,
    })?;
    let mut scale = OperandScale::Single;
    let mut opcode_at = offset;

    if let Some(prefix_scale) = opcode.prefix_scale() {
        opcode_at += 1;
        let byte = *bytes
            .get(opcode_at)
            .ok_or(BytecodeError::DanglingPrefix(offset))?;
        opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode {
            opcode: byte,
            offset: opcode_at,
        })?;
        if opcode.is_prefix() {
            return Err(BytecodeError::DanglingPrefix(offset));
        }
        if !opcode.has_scalable_operands() {
            return Err(BytecodeError::UnscalablePrefix(offset));
        }
        scale = prefix_scale;
    }
    if opcode == Opcode::Illegal {
        return Err(BytecodeError::InvalidOpcode {
            opcode: opcode.to_byte(),
            offset: opcode_at,
        });
    }

    let end = opcode_at + opcode.size(scale);
    if end > bytes.len() {
        return Err(BytecodeError::Truncated(offset));
    }

    let operands = opcode
        .operand_types()
        .iter()
        .enumerate()
        .map(|(i, ty)| read_operand(bytes, opcode_at + opcode.operand_offset(i, scale), *ty, scale))
        .collect();

    Ok(DecodedInstruction {
        offset,
        opcode,
        scale,
        size: end - offset,
        operands,
    })
}

/// Forward iterator over the instructions of a byte stream.
///
/// Yields at most one error, after which iteration stops.
#[derive(Debug, Clone)]
pub struct BytecodeIterator<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> BytecodeIterator<'a> {
    /// Iterate from the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            done: false,
        }
    }

    /// Offset of the next instruction to decode
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for BytecodeIterator<'_> {
    type Item = Result<DecodedInstruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.bytes.len() {
            return None;
        }
        match decode_at(self.bytes, self.offset) {
            Ok(instruction) => {
                self.offset = instruction.next_offset();
                Some(Ok(instruction))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode a whole stream, failing on the first malformed instruction
pub fn decode_all(bytes: &[u8]) -> Result<Vec<DecodedInstruction>> {
    BytecodeIterator::new(bytes).collect()
}
