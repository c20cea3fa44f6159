//! Runtime functions and intrinsics reachable from `CallRuntime` / `InvokeIntrinsic`

use serde::{Deserialize, Serialize};

/// Runtime functions callable with `CallRuntime`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum RuntimeFunction {
    /// Instantiate a batch of global declarations: (declarations, flags)
    DeclareGlobals = 0,
    /// Throw a TypeError for an assignment to a const binding: (name)
    ThrowConstAssignError = 1,
    /// Throw a ReferenceError: (name)
    ThrowReferenceError = 2,
    /// Abort with a message id: (message)
    Abort = 3,
    /// Trace hook for debugging generated code: (value)
    DebugTrace = 4,
}

impl RuntimeFunction {
    /// Decode a runtime function id
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Self::DeclareGlobals),
            1 => Some(Self::ThrowConstAssignError),
            2 => Some(Self::ThrowReferenceError),
            3 => Some(Self::Abort),
            4 => Some(Self::DebugTrace),
            _ => None,
        }
    }

    /// Encoded id
    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Name used by the disassembler
    pub const fn name(self) -> &'static str {
        match self {
            Self::DeclareGlobals => "DeclareGlobals",
            Self::ThrowConstAssignError => "ThrowConstAssignError",
            Self::ThrowReferenceError => "ThrowReferenceError",
            Self::Abort => "Abort",
            Self::DebugTrace => "DebugTrace",
        }
    }

    /// Number of arguments the function expects, if fixed
    pub const fn arity(self) -> Option<u32> {
        match self {
            Self::DeclareGlobals => Some(2),
            Self::ThrowConstAssignError | Self::ThrowReferenceError => Some(1),
            Self::Abort | Self::DebugTrace => Some(1),
        }
    }
}

/// Inline intrinsics callable with `InvokeIntrinsic`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IntrinsicId {
    /// `%_IsSmi(value)`
    IsSmi = 0,
    /// `%_IsArray(value)`
    IsArray = 1,
    /// `%_ToNumber(value)`
    ToNumber = 2,
    /// `%_ToString(value)`
    ToString = 3,
}

impl IntrinsicId {
    /// Decode an intrinsic id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::IsSmi),
            1 => Some(Self::IsArray),
            2 => Some(Self::ToNumber),
            3 => Some(Self::ToString),
            _ => None,
        }
    }

    /// Encoded id
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Name used by the disassembler
    pub const fn name(self) -> &'static str {
        match self {
            Self::IsSmi => "_IsSmi",
            Self::IsArray => "_IsArray",
            Self::ToNumber => "_ToNumber",
            Self::ToString => "_ToString",
        }
    }
}
