//! Bytecode errors

use thiserror::Error;

/// Errors that can occur during bytecode operations
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in bytecode file
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported bytecode version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Byte that does not name an opcode
    #[error("Invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode {
        /// Offending byte
        opcode: u8,
        /// Offset of the byte
        offset: usize,
    },

    /// Scale prefix followed by another prefix or by nothing
    #[error("Dangling operand scale prefix at offset {0}")]
    DanglingPrefix(usize),

    /// Scale prefix before an opcode without scalable operands
    #[error("Scale prefix before an unscalable opcode at offset {0}")]
    UnscalablePrefix(usize),

    /// Instruction runs past the end of the stream
    #[error("Truncated instruction at offset {0}")]
    Truncated(usize),

    /// Invalid operand
    #[error("Invalid operand at offset {0}")]
    InvalidOperand(usize),

    /// Unexpected end of bytecode
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
