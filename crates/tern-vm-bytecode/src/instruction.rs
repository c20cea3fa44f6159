//! Opcodes and the static opcode table
//!
//! Every consumer (the generator sizing its emissions, the decoder, the
//! analyses, the verifier, the disassembler and dispatch-table construction)
//! reads the same [`OpcodeInfo`] table; nothing re-derives operand layouts.

use serde::{Deserialize, Serialize};

use crate::operand::{OperandScale, OperandType};

/// Bytecode opcodes
///
/// Accumulator-centric register instruction set: most instructions read or
/// write the implicit accumulator and name explicit registers only for the
/// second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Prefixes ====================
    /// Operand scale prefix: following instruction uses 2-byte operands
    Wide = 0x00,
    /// Operand scale prefix: following instruction uses 4-byte operands
    ExtraWide = 0x01,

    // ==================== Accumulator loads ====================
    /// acc = 0
    LdaZero = 0x02,
    /// acc = imm
    LdaSmi = 0x03,
    /// acc = undefined
    LdaUndefined = 0x04,
    /// acc = null
    LdaNull = 0x05,
    /// acc = the hole (uninitialized let/const marker)
    LdaTheHole = 0x06,
    /// acc = true
    LdaTrue = 0x07,
    /// acc = false
    LdaFalse = 0x08,
    /// acc = constants\[idx\]
    LdaConstant = 0x09,

    // ==================== Globals ====================
    /// acc = global\[name\]
    LdaGlobal = 0x0A,
    /// acc = global\[name\], no ReferenceError for missing bindings
    LdaGlobalInsideTypeof = 0x0B,
    /// global\[name\] = acc
    StaGlobal = 0x0C,

    // ==================== Contexts ====================
    /// acc = context(reg, depth)\[slot\]
    LdaContextSlot = 0x0D,
    /// context(reg, depth)\[slot\] = acc
    StaContextSlot = 0x0E,
    /// acc = current_context\[slot\]
    LdaCurrentContextSlot = 0x0F,
    /// current_context\[slot\] = acc
    StaCurrentContextSlot = 0x10,
    /// acc = dynamic lookup of name
    LdaLookupSlot = 0x11,
    /// acc = dynamic lookup of name, no ReferenceError
    LdaLookupSlotInsideTypeof = 0x12,
    /// dynamic store of acc to name
    StaLookupSlot = 0x13,
    /// reg = current_context; current_context = acc
    PushContext = 0x14,
    /// current_context = reg
    PopContext = 0x15,

    // ==================== Register transfers ====================
    /// acc = reg
    Ldar = 0x16,
    /// reg = acc
    Star = 0x17,
    /// dst = src
    Mov = 0x18,

    // ==================== Properties ====================
    /// acc = obj.name
    GetNamedProperty = 0x19,
    /// acc = obj\[acc\]
    GetKeyedProperty = 0x1A,
    /// obj.name = acc
    SetNamedProperty = 0x1B,
    /// obj\[key\] = acc
    SetKeyedProperty = 0x1C,

    // ==================== Binary operations ====================
    /// acc = reg + acc
    Add = 0x1D,
    /// acc = reg - acc
    Sub = 0x1E,
    /// acc = reg * acc
    Mul = 0x1F,
    /// acc = reg / acc
    Div = 0x20,
    /// acc = reg % acc
    Mod = 0x21,
    /// acc = reg ** acc
    Exp = 0x22,
    /// acc = reg | acc
    BitwiseOr = 0x23,
    /// acc = reg ^ acc
    BitwiseXor = 0x24,
    /// acc = reg & acc
    BitwiseAnd = 0x25,
    /// acc = reg << acc
    ShiftLeft = 0x26,
    /// acc = reg >> acc
    ShiftRight = 0x27,
    /// acc = reg >>> acc
    ShiftRightLogical = 0x28,
    /// acc = acc + imm
    AddSmi = 0x29,

    // ==================== Unary operations ====================
    /// acc = acc + 1
    Inc = 0x2A,
    /// acc = acc - 1
    Dec = 0x2B,
    /// acc = -acc
    Negate = 0x2C,
    /// acc = ~acc
    BitwiseNot = 0x2D,
    /// acc = ToNumeric(acc)
    ToNumeric = 0x2E,
    /// acc = !acc, acc known to be boolean
    LogicalNot = 0x2F,
    /// acc = !ToBoolean(acc)
    ToBooleanLogicalNot = 0x30,
    /// acc = typeof acc
    TypeOf = 0x31,

    // ==================== Comparisons ====================
    /// acc = reg == acc
    TestEqual = 0x32,
    /// acc = reg === acc
    TestEqualStrict = 0x33,
    /// acc = reg < acc
    TestLessThan = 0x34,
    /// acc = reg > acc
    TestGreaterThan = 0x35,
    /// acc = reg <= acc
    TestLessThanOrEqual = 0x36,
    /// acc = reg >= acc
    TestGreaterThanOrEqual = 0x37,
    /// acc = reg instanceof acc
    TestInstanceOf = 0x38,
    /// acc = reg in acc
    TestIn = 0x39,

    // ==================== Allocation ====================
    /// acc = new closure for shared function constants\[idx\]
    CreateClosure = 0x3A,
    /// acc = object literal from boilerplate constants\[idx\]
    CreateObjectLiteral = 0x3B,
    /// acc = array literal from boilerplate constants\[idx\]
    CreateArrayLiteral = 0x3C,
    /// acc = new function context with `slots` slots
    CreateFunctionContext = 0x3D,
    /// acc = new block context for scope constants\[idx\]
    CreateBlockContext = 0x3E,
    /// acc = new catch context binding reg
    CreateCatchContext = 0x3F,

    // ==================== Calls ====================
    /// acc = callee.call(args\[0\], args\[1..\])
    CallProperty = 0x40,
    /// acc = callee(args...) with undefined receiver
    CallUndefinedReceiver = 0x41,
    /// acc = new callee(args...), new.target in acc
    Construct = 0x42,
    /// acc = runtime function(args...)
    CallRuntime = 0x43,
    /// acc = intrinsic(args...)
    InvokeIntrinsic = 0x44,

    // ==================== Control flow ====================
    /// pc += imm
    Jump = 0x45,
    /// pc += constants\[idx\]
    JumpConstant = 0x46,
    /// if acc === true: pc += imm
    JumpIfTrue = 0x47,
    /// if acc === true: pc += constants\[idx\]
    JumpIfTrueConstant = 0x48,
    /// if acc === false: pc += imm
    JumpIfFalse = 0x49,
    /// if acc === false: pc += constants\[idx\]
    JumpIfFalseConstant = 0x4A,
    /// if ToBoolean(acc): pc += imm
    JumpIfToBooleanTrue = 0x4B,
    /// if ToBoolean(acc): pc += constants\[idx\]
    JumpIfToBooleanTrueConstant = 0x4C,
    /// if !ToBoolean(acc): pc += imm
    JumpIfToBooleanFalse = 0x4D,
    /// if !ToBoolean(acc): pc += constants\[idx\]
    JumpIfToBooleanFalseConstant = 0x4E,
    /// if acc is neither undefined nor null: pc += imm
    JumpIfNotUndefinedOrNull = 0x4F,
    /// if acc is neither undefined nor null: pc += constants\[idx\]
    JumpIfNotUndefinedOrNullConstant = 0x50,
    /// Loop back-edge: pc += imm (imm <= 0), interrupt check at loop depth
    JumpLoop = 0x51,
    /// if acc is a Smi in \[base, base + len): pc += constants\[table + acc - base\]
    SwitchOnSmiNoFeedback = 0x52,

    // ==================== Exits and checks ====================
    /// if acc is the hole: throw ReferenceError(name)
    ThrowReferenceErrorIfHole = 0x53,
    /// throw acc
    Throw = 0x54,
    /// rethrow acc without updating the message
    ReThrow = 0x55,
    /// return acc
    Return = 0x56,
    /// Stack guard check
    StackCheck = 0x57,
    /// Debugger statement
    Debugger = 0x58,
    /// Never emitted; marks unused dispatch slots
    Illegal = 0x59,
}

/// How an opcode uses the implicit accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorUse {
    /// Neither reads nor writes
    None,
    /// Reads only
    Read,
    /// Writes only
    Write,
    /// Reads and writes
    ReadWrite,
}

impl AccumulatorUse {
    /// Whether the accumulator is read
    #[inline]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether the accumulator is written
    #[inline]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Opcode classification bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpcodeFlags(u8);

impl OpcodeFlags {
    /// No flags
    pub const NONE: Self = Self(0);
    /// Any jump
    pub const JUMP: Self = Self(1 << 0);
    /// Jump taken only under a condition
    pub const CONDITIONAL: Self = Self(1 << 1);
    /// Jump delta held in the constant pool
    pub const CONSTANT: Self = Self(1 << 2);
    /// Multi-way jump through a jump table
    pub const SWITCH: Self = Self(1 << 3);
    /// Leaves the function (return or throw)
    pub const EXIT: Self = Self(1 << 4);
    /// Operand scale prefix
    pub const PREFIX: Self = Self(1 << 5);

    const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every bit of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    /// The opcode
    pub opcode: Opcode,
    /// Mnemonic
    pub name: &'static str,
    /// Operand signature
    pub operands: &'static [OperandType],
    /// Accumulator usage
    pub accumulator: AccumulatorUse,
    /// Classification bits
    pub flags: OpcodeFlags,
}

use self::AccumulatorUse as A;
use crate::operand::OperandType as O;

const JUMP: OpcodeFlags = OpcodeFlags::JUMP;
const COND_JUMP: OpcodeFlags = OpcodeFlags::JUMP.union(OpcodeFlags::CONDITIONAL);
const JUMP_CONST: OpcodeFlags = OpcodeFlags::JUMP.union(OpcodeFlags::CONSTANT);
const COND_JUMP_CONST: OpcodeFlags = COND_JUMP.union(OpcodeFlags::CONSTANT);

const fn info(
    opcode: Opcode,
    name: &'static str,
    operands: &'static [OperandType],
    accumulator: AccumulatorUse,
    flags: OpcodeFlags,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        operands,
        accumulator,
        flags,
    }
}

/// Number of defined opcodes; bytes at or above this value are invalid
pub const OPCODE_COUNT: usize = Opcode::Illegal as usize + 1;

/// The opcode table, indexed by opcode byte
pub static OPCODE_TABLE: [OpcodeInfo; OPCODE_COUNT] = [
    info(Opcode::Wide, "Wide", &[], A::None, OpcodeFlags::PREFIX),
    info(Opcode::ExtraWide, "ExtraWide", &[], A::None, OpcodeFlags::PREFIX),
    info(Opcode::LdaZero, "LdaZero", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaSmi, "LdaSmi", &[O::Imm], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaUndefined, "LdaUndefined", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaNull, "LdaNull", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaTheHole, "LdaTheHole", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaTrue, "LdaTrue", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaFalse, "LdaFalse", &[], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaConstant, "LdaConstant", &[O::Idx], A::Write, OpcodeFlags::NONE),
    info(Opcode::LdaGlobal, "LdaGlobal", &[O::Idx, O::Slot], A::Write, OpcodeFlags::NONE),
    info(
        Opcode::LdaGlobalInsideTypeof,
        "LdaGlobalInsideTypeof",
        &[O::Idx, O::Slot],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(Opcode::StaGlobal, "StaGlobal", &[O::Idx, O::Slot], A::Read, OpcodeFlags::NONE),
    info(
        Opcode::LdaContextSlot,
        "LdaContextSlot",
        &[O::Reg, O::Idx, O::UImm],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::StaContextSlot,
        "StaContextSlot",
        &[O::Reg, O::Idx, O::UImm],
        A::Read,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::LdaCurrentContextSlot,
        "LdaCurrentContextSlot",
        &[O::Idx],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::StaCurrentContextSlot,
        "StaCurrentContextSlot",
        &[O::Idx],
        A::Read,
        OpcodeFlags::NONE,
    ),
    info(Opcode::LdaLookupSlot, "LdaLookupSlot", &[O::Idx], A::Write, OpcodeFlags::NONE),
    info(
        Opcode::LdaLookupSlotInsideTypeof,
        "LdaLookupSlotInsideTypeof",
        &[O::Idx],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::StaLookupSlot,
        "StaLookupSlot",
        &[O::Idx, O::Flag8],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::PushContext, "PushContext", &[O::RegOut], A::Read, OpcodeFlags::NONE),
    info(Opcode::PopContext, "PopContext", &[O::Reg], A::None, OpcodeFlags::NONE),
    info(Opcode::Ldar, "Ldar", &[O::Reg], A::Write, OpcodeFlags::NONE),
    info(Opcode::Star, "Star", &[O::RegOut], A::Read, OpcodeFlags::NONE),
    info(Opcode::Mov, "Mov", &[O::Reg, O::RegOut], A::None, OpcodeFlags::NONE),
    info(
        Opcode::GetNamedProperty,
        "GetNamedProperty",
        &[O::Reg, O::Idx, O::Slot],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::GetKeyedProperty,
        "GetKeyedProperty",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::SetNamedProperty,
        "SetNamedProperty",
        &[O::Reg, O::Idx, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::SetKeyedProperty,
        "SetKeyedProperty",
        &[O::Reg, O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::Add, "Add", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Sub, "Sub", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Mul, "Mul", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Div, "Div", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Mod, "Mod", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Exp, "Exp", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::BitwiseOr, "BitwiseOr", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::BitwiseXor, "BitwiseXor", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::BitwiseAnd, "BitwiseAnd", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::ShiftLeft, "ShiftLeft", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::ShiftRight, "ShiftRight", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(
        Opcode::ShiftRightLogical,
        "ShiftRightLogical",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::AddSmi, "AddSmi", &[O::Imm, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Inc, "Inc", &[O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Dec, "Dec", &[O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::Negate, "Negate", &[O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::BitwiseNot, "BitwiseNot", &[O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::ToNumeric, "ToNumeric", &[O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::LogicalNot, "LogicalNot", &[], A::ReadWrite, OpcodeFlags::NONE),
    info(
        Opcode::ToBooleanLogicalNot,
        "ToBooleanLogicalNot",
        &[],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::TypeOf, "TypeOf", &[], A::ReadWrite, OpcodeFlags::NONE),
    info(Opcode::TestEqual, "TestEqual", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(
        Opcode::TestEqualStrict,
        "TestEqualStrict",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::TestLessThan, "TestLessThan", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(
        Opcode::TestGreaterThan,
        "TestGreaterThan",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::TestLessThanOrEqual,
        "TestLessThanOrEqual",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::TestGreaterThanOrEqual,
        "TestGreaterThanOrEqual",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::TestInstanceOf,
        "TestInstanceOf",
        &[O::Reg, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(Opcode::TestIn, "TestIn", &[O::Reg, O::Slot], A::ReadWrite, OpcodeFlags::NONE),
    info(
        Opcode::CreateClosure,
        "CreateClosure",
        &[O::Idx, O::Slot, O::Flag8],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CreateObjectLiteral,
        "CreateObjectLiteral",
        &[O::Idx, O::Slot, O::Flag8],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CreateArrayLiteral,
        "CreateArrayLiteral",
        &[O::Idx, O::Slot, O::Flag8],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CreateFunctionContext,
        "CreateFunctionContext",
        &[O::Idx, O::UImm],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(Opcode::CreateBlockContext, "CreateBlockContext", &[O::Idx], A::Write, OpcodeFlags::NONE),
    info(
        Opcode::CreateCatchContext,
        "CreateCatchContext",
        &[O::Reg, O::Idx],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CallProperty,
        "CallProperty",
        &[O::Reg, O::RegList, O::RegCount, O::Slot],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CallUndefinedReceiver,
        "CallUndefinedReceiver",
        &[O::Reg, O::RegList, O::RegCount, O::Slot],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::Construct,
        "Construct",
        &[O::Reg, O::RegList, O::RegCount, O::Slot],
        A::ReadWrite,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::CallRuntime,
        "CallRuntime",
        &[O::RuntimeId, O::RegList, O::RegCount],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(
        Opcode::InvokeIntrinsic,
        "InvokeIntrinsic",
        &[O::IntrinsicId, O::RegList, O::RegCount],
        A::Write,
        OpcodeFlags::NONE,
    ),
    info(Opcode::Jump, "Jump", &[O::Imm], A::None, JUMP),
    info(Opcode::JumpConstant, "JumpConstant", &[O::Idx], A::None, JUMP_CONST),
    info(Opcode::JumpIfTrue, "JumpIfTrue", &[O::Imm], A::Read, COND_JUMP),
    info(Opcode::JumpIfTrueConstant, "JumpIfTrueConstant", &[O::Idx], A::Read, COND_JUMP_CONST),
    info(Opcode::JumpIfFalse, "JumpIfFalse", &[O::Imm], A::Read, COND_JUMP),
    info(Opcode::JumpIfFalseConstant, "JumpIfFalseConstant", &[O::Idx], A::Read, COND_JUMP_CONST),
    info(Opcode::JumpIfToBooleanTrue, "JumpIfToBooleanTrue", &[O::Imm], A::Read, COND_JUMP),
    info(
        Opcode::JumpIfToBooleanTrueConstant,
        "JumpIfToBooleanTrueConstant",
        &[O::Idx],
        A::Read,
        COND_JUMP_CONST,
    ),
    info(Opcode::JumpIfToBooleanFalse, "JumpIfToBooleanFalse", &[O::Imm], A::Read, COND_JUMP),
    info(
        Opcode::JumpIfToBooleanFalseConstant,
        "JumpIfToBooleanFalseConstant",
        &[O::Idx],
        A::Read,
        COND_JUMP_CONST,
    ),
    info(
        Opcode::JumpIfNotUndefinedOrNull,
        "JumpIfNotUndefinedOrNull",
        &[O::Imm],
        A::Read,
        COND_JUMP,
    ),
    info(
        Opcode::JumpIfNotUndefinedOrNullConstant,
        "JumpIfNotUndefinedOrNullConstant",
        &[O::Idx],
        A::Read,
        COND_JUMP_CONST,
    ),
    info(Opcode::JumpLoop, "JumpLoop", &[O::Imm, O::UImm], A::None, JUMP),
    info(
        Opcode::SwitchOnSmiNoFeedback,
        "SwitchOnSmiNoFeedback",
        &[O::Idx, O::UImm, O::Imm],
        A::Read,
        OpcodeFlags::SWITCH,
    ),
    info(
        Opcode::ThrowReferenceErrorIfHole,
        "ThrowReferenceErrorIfHole",
        &[O::Idx],
        A::Read,
        OpcodeFlags::NONE,
    ),
    info(Opcode::Throw, "Throw", &[], A::Read, OpcodeFlags::EXIT),
    info(Opcode::ReThrow, "ReThrow", &[], A::Read, OpcodeFlags::EXIT),
    info(Opcode::Return, "Return", &[], A::Read, OpcodeFlags::EXIT),
    info(Opcode::StackCheck, "StackCheck", &[], A::None, OpcodeFlags::NONE),
    info(Opcode::Debugger, "Debugger", &[], A::None, OpcodeFlags::NONE),
    info(Opcode::Illegal, "Illegal", &[], A::None, OpcodeFlags::NONE),
];

impl Opcode {
    /// Decode an opcode byte
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODE_TABLE.get(byte as usize).map(|info| info.opcode)
    }

    /// Encoded byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Table entry for this opcode
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    /// Mnemonic
    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Operand signature
    #[inline]
    pub fn operand_types(self) -> &'static [OperandType] {
        self.info().operands
    }

    /// Number of operands
    #[inline]
    pub fn operand_count(self) -> usize {
        self.info().operands.len()
    }

    /// Type of operand `i`
    #[inline]
    pub fn operand_type(self, i: usize) -> OperandType {
        self.info().operands[i]
    }

    /// Accumulator usage
    #[inline]
    pub fn accumulator_use(self) -> AccumulatorUse {
        self.info().accumulator
    }

    /// Byte offset of operand `i` from the opcode byte under `scale`
    pub fn operand_offset(self, i: usize, scale: OperandScale) -> usize {
        1 + self.operand_types()[..i]
            .iter()
            .map(|ty| ty.size(scale).bytes())
            .sum::<usize>()
    }

    /// Instruction size (opcode plus operands) under `scale`, prefix excluded
    pub fn size(self, scale: OperandScale) -> usize {
        self.operand_offset(self.operand_count(), scale)
    }

    /// Whether any operand follows the operand scale
    pub fn has_scalable_operands(self) -> bool {
        self.operand_types().iter().any(|ty| ty.is_scalable())
    }

    /// Whether this is an operand scale prefix
    #[inline]
    pub fn is_prefix(self) -> bool {
        self.info().flags.contains(OpcodeFlags::PREFIX)
    }

    /// Scale selected by this prefix
    pub fn prefix_scale(self) -> Option<OperandScale> {
        match self {
            Self::Wide => Some(OperandScale::Double),
            Self::ExtraWide => Some(OperandScale::Quadruple),
            _ => None,
        }
    }

    /// Prefix needed to encode an instruction at `scale`
    pub fn prefix_for_scale(scale: OperandScale) -> Option<Self> {
        match scale {
            OperandScale::Single => None,
            OperandScale::Double => Some(Self::Wide),
            OperandScale::Quadruple => Some(Self::ExtraWide),
        }
    }

    /// Any jump, immediate or constant
    #[inline]
    pub fn is_jump(self) -> bool {
        self.info().flags.contains(OpcodeFlags::JUMP)
    }

    /// Jump taken only under a condition
    #[inline]
    pub fn is_conditional_jump(self) -> bool {
        self.info().flags.contains(OpcodeFlags::CONDITIONAL)
    }

    /// Unconditional jump (including `JumpLoop`)
    #[inline]
    pub fn is_unconditional_jump(self) -> bool {
        self.is_jump() && !self.is_conditional_jump()
    }

    /// Jump whose delta lives in the constant pool
    #[inline]
    pub fn is_jump_constant(self) -> bool {
        self.info().flags.contains(OpcodeFlags::CONSTANT)
    }

    /// Jump with an immediate delta
    #[inline]
    pub fn is_jump_immediate(self) -> bool {
        self.is_jump() && !self.is_jump_constant()
    }

    /// Multi-way jump through a jump table
    #[inline]
    pub fn is_switch(self) -> bool {
        self.info().flags.contains(OpcodeFlags::SWITCH)
    }

    /// Return or throw
    #[inline]
    pub fn is_return_or_throw(self) -> bool {
        self.info().flags.contains(OpcodeFlags::EXIT)
    }

    /// Whether control never falls through to the next instruction
    #[inline]
    pub fn is_terminator(self) -> bool {
        self.is_return_or_throw() || self.is_unconditional_jump()
    }

    /// Whether the instruction reads any register operand
    pub fn reads_registers(self) -> bool {
        self.operand_types().iter().any(|ty| ty.is_register_input())
    }

    /// Whether the instruction writes a register operand
    pub fn writes_registers(self) -> bool {
        self.operand_types().iter().any(|ty| ty.is_register_output())
    }

    /// Constant-pool twin of an immediate jump
    pub fn to_constant_jump(self) -> Option<Self> {
        match self {
            Self::Jump => Some(Self::JumpConstant),
            Self::JumpIfTrue => Some(Self::JumpIfTrueConstant),
            Self::JumpIfFalse => Some(Self::JumpIfFalseConstant),
            Self::JumpIfToBooleanTrue => Some(Self::JumpIfToBooleanTrueConstant),
            Self::JumpIfToBooleanFalse => Some(Self::JumpIfToBooleanFalseConstant),
            Self::JumpIfNotUndefinedOrNull => Some(Self::JumpIfNotUndefinedOrNullConstant),
            _ => None,
        }
    }
}

/// One slot of the opcode × operand-scale dispatch table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    /// Position in the dispatch table
    pub index: usize,
    /// Opcode dispatched at this slot
    pub opcode: Opcode,
    /// Operand scale of this slot
    pub scale: OperandScale,
    /// Handler name, e.g. `LdaSmi.Wide`
    pub handler: String,
    /// Whether a handler exists; unused slots dispatch to `Illegal`
    pub has_handler: bool,
}

/// Dispatch-table index for `opcode` at `scale`
#[inline]
pub fn dispatch_index(opcode: Opcode, scale: OperandScale) -> usize {
    scale.index() * 256 + opcode as usize
}

/// Enumerate the opcode × operand-scale cross product.
///
/// Prefixes only have a `Single` handler; opcodes without scalable operands
/// have no scaled handlers.
pub fn dispatch_table() -> Vec<DispatchEntry> {
    let mut entries = Vec::with_capacity(OPCODE_COUNT * OperandScale::ALL.len());
    for scale in OperandScale::ALL {
        for info in OPCODE_TABLE.iter() {
            let has_handler = info.opcode != Opcode::Illegal
                && (scale == OperandScale::Single
                    || (!info.opcode.is_prefix() && info.opcode.has_scalable_operands()));
            entries.push(DispatchEntry {
                index: dispatch_index(info.opcode, scale),
                opcode: info.opcode,
                scale,
                handler: format!("{}{}", info.name, scale.suffix()),
                has_handler,
            });
        }
    }
    entries
}
