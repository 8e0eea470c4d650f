//! Error types for the MOA compiler

use std::fmt;

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Sequence of child indices leading from a root to a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[usize]> for NodePath {
    fn from(path: &[usize]) -> Self {
        Self(path.to_vec())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Compilation errors
///
/// Every error aborts the current compilation. Errors raised while visiting a
/// tree carry the path of the offending node.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Symbol conflict: \"{name}\" is already defined as {existing}, cannot redefine as {attempted}")]
    SymbolConflict {
        name: String,
        existing: String,
        attempted: String,
    },

    #[error("Unknown symbol: \"{name}\" is not in the symbol table")]
    UnknownSymbol { name: String },

    #[error("Shape error at node {path}: {message}")]
    ShapeError { path: NodePath, message: String },

    #[error("Reduction did not converge at node {path} within {limit} rewrites")]
    ReductionNonconvergence { path: NodePath, limit: usize },

    #[error("Unsupported pattern at node {path}: {message}")]
    UnsupportedPattern { path: NodePath, message: String },

    #[error("Merge conflict: user symbol \"{name}\" differs between expressions ({left} != {right})")]
    MergeConflict {
        name: String,
        left: String,
        right: String,
    },

    #[error("Lowering error: {message}")]
    LoweringError { message: String },

    #[error("Code generation error: {message}")]
    CodeGenError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn unknown_symbol(name: impl Into<String>) -> Self {
        CompileError::UnknownSymbol { name: name.into() }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        CompileError::ShapeError {
            path: NodePath::root(),
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        CompileError::UnsupportedPattern {
            path: NodePath::root(),
            message: msg.into(),
        }
    }

    pub fn lowering(msg: impl Into<String>) -> Self {
        CompileError::LoweringError { message: msg.into() }
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        CompileError::CodeGenError { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::ConfigError { message: msg.into() }
    }

    /// Attach `path` to a path-carrying error raised relative to a subtree.
    ///
    /// Handlers see a context scoped to a single node and report errors at
    /// the root path; the traversal that invoked them prefixes the real
    /// location.
    pub fn located(self, path: &[usize]) -> Self {
        fn prefixed(path: &[usize], inner: NodePath) -> NodePath {
            let mut full = path.to_vec();
            full.extend(inner.0);
            NodePath(full)
        }

        match self {
            CompileError::ShapeError { path: inner, message } => CompileError::ShapeError {
                path: prefixed(path, inner),
                message,
            },
            CompileError::UnsupportedPattern { path: inner, message } => {
                CompileError::UnsupportedPattern {
                    path: prefixed(path, inner),
                    message,
                }
            }
            CompileError::ReductionNonconvergence { path: inner, limit } => {
                CompileError::ReductionNonconvergence {
                    path: prefixed(path, inner),
                    limit,
                }
            }
            other => other,
        }
    }

    /// Short label used by the CLI when reporting failures
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::LexerError { .. } => "Lexer error",
            CompileError::ParseError { .. } => "Parse error",
            CompileError::SymbolConflict { .. } => "Symbol conflict",
            CompileError::UnknownSymbol { .. } => "Unknown symbol",
            CompileError::ShapeError { .. } => "Shape error",
            CompileError::ReductionNonconvergence { .. } => "Reduction error",
            CompileError::UnsupportedPattern { .. } => "Unsupported pattern",
            CompileError::MergeConflict { .. } => "Merge conflict",
            CompileError::LoweringError { .. } => "Lowering error",
            CompileError::CodeGenError { .. } => "Code generation error",
            CompileError::ConfigError { .. } => "Configuration error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_prefixes_path() {
        let err = CompileError::shape("bad").located(&[1]).located(&[0]);
        match err {
            CompileError::ShapeError { path, .. } => assert_eq!(path, NodePath(vec![0, 1])),
            other => panic!("Expected ShapeError, got {:?}", other),
        }
    }

    #[test]
    fn test_located_ignores_table_errors() {
        let err = CompileError::unknown_symbol("A").located(&[0, 1]);
        assert!(matches!(err, CompileError::UnknownSymbol { .. }));
    }

    #[test]
    fn test_path_display() {
        assert_eq!(NodePath(vec![0, 1, 1]).to_string(), "(0, 1, 1)");
        assert_eq!(NodePath::root().to_string(), "()");
    }
}
