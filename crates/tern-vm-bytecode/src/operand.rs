//! Bytecode operands: registers, operand types and operand scaling

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of fixed frame slots addressed with negative register indices
/// (`<closure>`, `<context>`, `<new.target>`).
pub const FIXED_FRAME_SLOTS: i32 = 3;

/// Virtual register in the activation's register file.
///
/// Non-negative indices are locals and temporaries. Negative indices address
/// the fixed frame slots and the parameters (receiver first), which sit below
/// the fixed slots relative to the frame pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub i32);

impl Register {
    /// Create a register from its raw index
    #[inline]
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> i32 {
        self.0
    }

    /// Slot holding the function closure being executed
    #[inline]
    pub const fn function_closure() -> Self {
        Self(-1)
    }

    /// Slot holding the current context
    #[inline]
    pub const fn current_context() -> Self {
        Self(-2)
    }

    /// Slot holding `new.target`
    #[inline]
    pub const fn new_target() -> Self {
        Self(-3)
    }

    /// Register for parameter `index` (receiver is parameter 0)
    #[inline]
    pub const fn from_parameter_index(index: u32, parameter_count: u32) -> Self {
        Self(-(FIXED_FRAME_SLOTS + parameter_count as i32) + index as i32)
    }

    /// The receiver register
    #[inline]
    pub const fn receiver(parameter_count: u32) -> Self {
        Self::from_parameter_index(0, parameter_count)
    }

    /// Parameter index of this register, if it addresses a parameter
    pub fn to_parameter_index(self, parameter_count: u32) -> Option<u32> {
        if !self.is_parameter() {
            return None;
        }
        let index = self.0 + FIXED_FRAME_SLOTS + parameter_count as i32;
        (index >= 0 && (index as u32) < parameter_count).then_some(index as u32)
    }

    /// Whether this register addresses a parameter slot
    #[inline]
    pub const fn is_parameter(self) -> bool {
        self.0 < -FIXED_FRAME_SLOTS
    }

    /// Whether this register addresses a fixed frame slot
    #[inline]
    pub const fn is_fixed_slot(self) -> bool {
        self.0 < 0 && self.0 >= -FIXED_FRAME_SLOTS
    }

    /// Whether this is a local/temporary register
    #[inline]
    pub const fn is_local(self) -> bool {
        self.0 >= 0
    }

    /// The register directly after this one
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Render the register for a frame with `parameter_count` parameters.
    pub fn describe(self, parameter_count: u32) -> String {
        if self.is_local() {
            return format!("r{}", self.0);
        }
        if self.is_fixed_slot() {
            return self.to_string();
        }
        match self.to_parameter_index(parameter_count) {
            Some(0) => "<this>".to_string(),
            Some(index) => format!("a{}", index - 1),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            -1 => write!(f, "<closure>"),
            -2 => write!(f, "<context>"),
            -3 => write!(f, "<new.target>"),
            index if index >= 0 => write!(f, "r{}", index),
            index => write!(f, "p{}", index),
        }
    }
}

impl From<i32> for Register {
    fn from(index: i32) -> Self {
        Self(index)
    }
}

/// A contiguous run of registers `[first, first + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterList {
    first: Register,
    count: u32,
}

impl RegisterList {
    /// Create a register list
    #[inline]
    pub const fn new(first: Register, count: u32) -> Self {
        Self { first, count }
    }

    /// An empty list anchored at `first`
    #[inline]
    pub const fn empty(first: Register) -> Self {
        Self { first, count: 0 }
    }

    /// First register of the list
    #[inline]
    pub const fn first(&self) -> Register {
        self.first
    }

    /// Number of registers in the list
    #[inline]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Register at position `i` of the list
    #[inline]
    pub fn get(&self, i: u32) -> Register {
        assert!(i < self.count, "register list index {} out of range", i);
        Register(self.first.0 + i as i32)
    }

    /// The list without its first register
    pub fn pop_front(&self) -> RegisterList {
        assert!(self.count > 0, "pop_front on empty register list");
        RegisterList::new(self.first.next(), self.count - 1)
    }

    /// Last register of the list
    pub fn last(&self) -> Option<Register> {
        (self.count > 0).then(|| Register(self.first.0 + self.count as i32 - 1))
    }
}

/// Index into the constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the feedback vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeedbackSlot(pub u32);

impl FeedbackSlot {
    /// Create a new feedback slot
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Kind of value an operand encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// Signed immediate
    Imm,
    /// Unsigned immediate
    UImm,
    /// Constant pool index
    Idx,
    /// Feedback slot index
    Slot,
    /// Register read by the instruction
    Reg,
    /// Register written by the instruction
    RegOut,
    /// First register of a register list; followed by a `RegCount`
    RegList,
    /// Number of registers in the preceding register list
    RegCount,
    /// 8-bit flag, never scaled
    Flag8,
    /// Intrinsic id, never scaled
    IntrinsicId,
    /// Runtime function id, never scaled
    RuntimeId,
}

impl OperandType {
    /// Whether the operand width follows the instruction's operand scale
    #[inline]
    pub const fn is_scalable(self) -> bool {
        !matches!(self, Self::Flag8 | Self::IntrinsicId | Self::RuntimeId)
    }

    /// Whether the operand is interpreted as a signed value
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Imm | Self::Reg | Self::RegOut | Self::RegList)
    }

    /// Whether the operand names registers the instruction reads
    #[inline]
    pub const fn is_register_input(self) -> bool {
        matches!(self, Self::Reg | Self::RegList)
    }

    /// Whether the operand names a register the instruction writes
    #[inline]
    pub const fn is_register_output(self) -> bool {
        matches!(self, Self::RegOut)
    }

    /// Whether the operand is any kind of register operand
    #[inline]
    pub const fn is_register(self) -> bool {
        matches!(self, Self::Reg | Self::RegOut | Self::RegList)
    }

    /// Width of the operand under `scale`
    #[inline]
    pub const fn size(self, scale: OperandScale) -> OperandSize {
        match self {
            Self::Flag8 | Self::IntrinsicId => OperandSize::Byte,
            Self::RuntimeId => OperandSize::Short,
            _ => scale.scalable_operand_size(),
        }
    }
}

/// Width of an encoded operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperandSize {
    /// 1 byte
    Byte = 1,
    /// 2 bytes
    Short = 2,
    /// 4 bytes
    Quad = 4,
}

impl OperandSize {
    /// Width in bytes
    #[inline]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Whether the signed value fits in this width
    pub const fn fits_signed(self, value: i64) -> bool {
        match self {
            Self::Byte => value >= i8::MIN as i64 && value <= i8::MAX as i64,
            Self::Short => value >= i16::MIN as i64 && value <= i16::MAX as i64,
            Self::Quad => value >= i32::MIN as i64 && value <= i32::MAX as i64,
        }
    }

    /// Whether the unsigned value fits in this width
    pub const fn fits_unsigned(self, value: u64) -> bool {
        match self {
            Self::Byte => value <= u8::MAX as u64,
            Self::Short => value <= u16::MAX as u64,
            Self::Quad => value <= u32::MAX as u64,
        }
    }
}

/// Width class applied to every scalable operand of one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperandScale {
    /// 1-byte operands, no prefix
    Single,
    /// 2-byte operands, `Wide` prefix
    Double,
    /// 4-byte operands, `ExtraWide` prefix
    Quadruple,
}

impl OperandScale {
    /// All scales, narrowest first
    pub const ALL: [OperandScale; 3] = [Self::Single, Self::Double, Self::Quadruple];

    /// Width of a scalable operand under this scale
    #[inline]
    pub const fn scalable_operand_size(self) -> OperandSize {
        match self {
            Self::Single => OperandSize::Byte,
            Self::Double => OperandSize::Short,
            Self::Quadruple => OperandSize::Quad,
        }
    }

    /// Position of the scale in [`OperandScale::ALL`]
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Single => 0,
            Self::Double => 1,
            Self::Quadruple => 2,
        }
    }

    /// Smallest scale whose operand width holds the signed value
    pub const fn for_signed(value: i64) -> Self {
        if OperandSize::Byte.fits_signed(value) {
            Self::Single
        } else if OperandSize::Short.fits_signed(value) {
            Self::Double
        } else {
            Self::Quadruple
        }
    }

    /// Smallest scale whose operand width holds the unsigned value
    pub const fn for_unsigned(value: u64) -> Self {
        if OperandSize::Byte.fits_unsigned(value) {
            Self::Single
        } else if OperandSize::Short.fits_unsigned(value) {
            Self::Double
        } else {
            Self::Quadruple
        }
    }

    /// Suffix used in handler names (`LdaSmi.Wide`)
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Single => "",
            Self::Double => ".Wide",
            Self::Quadruple => ".ExtraWide",
        }
    }
}
