//! Main compiler implementation

use tern_vm_bytecode::Script;

use crate::ast::FunctionLiteral;
use crate::config::CompilerConfig;
use crate::context::CompilationContext;
use crate::error::CompileResult;
use crate::generator::compile_function;

/// The compiler
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    /// Create a compiler with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compiler with `config`
    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile a top-level function and everything nested in it.
    ///
    /// The top-level function gets literal id 0. Every array in the returned
    /// script has passed verification.
    ///
    /// # Errors
    ///
    /// [`CompileError::StackOverflow`](crate::CompileError::StackOverflow)
    /// when function nesting or expression depth exceeds the configured
    /// limits.
    pub fn compile(&self, literal: &FunctionLiteral, source_url: &str) -> CompileResult<Script> {
        let mut ctx = CompilationContext::new();
        let top_level = compile_function(&mut ctx, &self.config, literal, 0)?;
        debug_assert_eq!(top_level, 0);

        let script = Script::new(source_url, ctx.into_functions());
        tracing::debug!(
            target: "tern::compiler",
            source_url,
            functions = script.functions.len(),
            "script compiled"
        );
        Ok(script)
    }
}
