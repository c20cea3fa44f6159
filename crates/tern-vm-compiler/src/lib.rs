//! # Tern VM Compiler
//!
//! Lowers an analysed syntax tree to verified register bytecode.
//!
//! ## Pipeline
//!
//! 1. Walk each [`FunctionLiteral`](ast::FunctionLiteral) with the generator
//! 2. Encode instructions and resolve labels in the array builder
//! 3. Finalize the array and run the verifier
//! 4. Collect every function of the script by literal id

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod aliases;
pub mod ast;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod context;
pub mod control_flow;
pub mod error;
pub mod generator;
pub mod labels;
pub mod register_allocator;
pub mod scope;

pub use aliases::OperandAliasTracker;
pub use builder::BytecodeArrayBuilder;
pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use context::CompilationContext;
pub use control_flow::{LoopBuilder, SwitchBuilder};
pub use error::{CompileError, CompileResult};
pub use labels::{BytecodeLabel, LabelId};
pub use register_allocator::{RegisterAllocationObserver, RegisterAllocator};
pub use scope::{ContextScopeStack, ControlScope, ControlScopeStack};
