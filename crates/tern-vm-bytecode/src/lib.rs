//! # Tern VM Bytecode
//!
//! The binary contract shared by the bytecode generator, the analyses, the
//! verifier and the dispatch loop.
//!
//! ## Design Principles
//!
//! - **Accumulator-centric**: most instructions read or write one implicit
//!   accumulator and name explicit registers only where needed
//! - **Compact**: operands are one byte unless a `Wide`/`ExtraWide` prefix
//!   scales them
//! - **One table**: operand layouts, sizes and dispatch slots all come from
//!   [`OPCODE_TABLE`]
//! - **Verified before use**: a [`BytecodeArray`] is published only after
//!   passing the [`Verifier`]

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod array;
pub mod constant;
pub mod decoder;
pub mod disassembler;
pub mod error;
pub mod handler_table;
pub mod instruction;
pub mod operand;
pub mod runtime;
pub mod script;
pub mod source_positions;
pub mod verifier;

pub use array::BytecodeArray;
pub use constant::{
    Constant, ConstantPool, GlobalDeclaration, GlobalDeclarationKind, ScopeInfo, ScopeKind,
    SharedFunctionInfo,
};
pub use decoder::{BytecodeIterator, DecodedInstruction};
pub use disassembler::disassemble;
pub use error::BytecodeError;
pub use handler_table::{CatchPrediction, HandlerRange, HandlerTable};
pub use instruction::{AccumulatorUse, OPCODE_TABLE, Opcode, OpcodeInfo, dispatch_table};
pub use operand::{
    ConstantIndex, FeedbackSlot, OperandScale, OperandSize, OperandType, Register, RegisterList,
};
pub use runtime::{IntrinsicId, RuntimeFunction};
pub use script::Script;
pub use source_positions::{SourcePositionEntry, SourcePositionTable};
pub use verifier::{VerificationMode, Verifier, VerifyError};

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for bytecode files
pub const BYTECODE_MAGIC: [u8; 8] = *b"TERNBC\0\0";
