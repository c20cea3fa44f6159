//! Compiler configuration

use serde::Deserialize;
use tern_vm_bytecode::VerificationMode;

use crate::error::CompileResult;

/// Compiler configuration, typically loaded from JSON
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Verification applied to every generated bytecode array
    pub verification: VerificationMode,

    /// Record statement and call source positions
    pub source_positions: bool,

    /// Deepest allowed nesting of function literals
    pub max_function_nesting: u32,

    /// Deepest allowed expression nesting
    pub max_expression_depth: u32,

    /// Minimum number of integer cases before a switch uses a jump table
    pub jump_table_min_cases: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            verification: VerificationMode::Light,
            source_positions: true,
            max_function_nesting: 64,
            max_expression_depth: 1024,
            jump_table_min_cases: 4,
        }
    }
}

impl CompilerConfig {
    /// Parse configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = CompilerConfig::from_json(r#"{ "verification": "full", "max_function_nesting": 3 }"#)
            .unwrap();
        assert_eq!(config.verification, VerificationMode::Full);
        assert_eq!(config.max_function_nesting, 3);
        assert_eq!(config.jump_table_min_cases, CompilerConfig::default().jump_table_min_cases);
        assert!(config.source_positions);
    }

    #[test]
    fn test_invalid_config() {
        let err = CompilerConfig::from_json(r#"{ "verification": "paranoid" }"#).unwrap_err();
        assert!(err.to_string().starts_with("Invalid compiler configuration"));
    }
}
