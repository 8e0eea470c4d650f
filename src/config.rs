//! Compiler configuration

use serde::{Deserialize, Serialize};

use crate::ast::DEFAULT_MAX_ITERATIONS;
use crate::error::{CompileError, CompileResult};

/// Options controlling the compilation pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Rewrites allowed at a single node before reduction gives up
    pub max_rewrite_iterations: usize,
    /// Emit runtime guards on argument dimension and shape
    pub include_conditions: bool,
    /// Name of the generated Python function
    pub function_name: String,
    /// Inline rank-0 constants as literals in generated code
    pub materialize_scalars: bool,
}

impl CompilerConfig {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> CompileResult<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_rewrite_iterations: DEFAULT_MAX_ITERATIONS,
            include_conditions: true,
            function_name: "moa_function".to_string(),
            materialize_scalars: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.max_rewrite_iterations, 100);
        assert!(config.include_conditions);
        assert_eq!(config.function_name, "moa_function");
        assert!(config.materialize_scalars);
    }

    #[test]
    fn test_partial_json() {
        let config = CompilerConfig::from_json(r#"{"function_name": "add", "include_conditions": false}"#).unwrap();
        assert_eq!(
            config,
            CompilerConfig {
                include_conditions: false,
                ..CompilerConfig::new("add")
            }
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CompilerConfig {
            max_rewrite_iterations: 7,
            ..CompilerConfig::default()
        };
        assert_eq!(CompilerConfig::from_json(&config.to_json().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            CompilerConfig::from_json(r#"{"max_rewrite_iterations": "many"}"#),
            Err(CompileError::ConfigError { .. })
        ));
    }
}
