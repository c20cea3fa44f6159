//! Compilation errors
//!
//! Only recoverable failures live here. Unsupported constructs and broken
//! internal invariants abort compilation with a panic.

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Function nesting or expression depth exceeded the configured limit
    #[error("Stack overflow while compiling '{function}' (depth {depth})")]
    StackOverflow {
        /// Name of the function being compiled
        function: String,
        /// Depth that exceeded the limit
        depth: u32,
    },

    /// Configuration could not be parsed
    #[error("Invalid compiler configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

impl CompileError {
    /// Create a stack overflow error
    pub fn stack_overflow(function: impl Into<String>, depth: u32) -> Self {
        Self::StackOverflow {
            function: function.into(),
            depth,
        }
    }

    /// Whether this is a stack overflow
    pub fn is_stack_overflow(&self) -> bool {
        matches!(self, Self::StackOverflow { .. })
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
