//! Mathematics of Arrays Compiler
//!
//! This library compiles whole-array expressions written in MOA notation into
//! explicit loop nests. Each stage is available on its own:
//!
//! 1. [`parse`] builds an expression tree and symbol table
//! 2. [`calculate_shapes`] infers shapes, collecting symbolic conditions
//! 3. [`reduce_to_dnf`] pushes indexing through every operator
//! 4. [`reduce_to_onf`] lowers the result to a guarded loop nest
//! 5. [`generate_python_function`] renders it as Python source
//!
//! # Example
//!
//! ```rust
//! use moa_compiler::{compile, CompilerConfig};
//!
//! let result = compile("<0> psi (tran (A ^ <3 4> + B ^ <3 4>))", &CompilerConfig::default()).unwrap();
//! assert!(result.python.contains("for _i3 in range(0, 3, 1):"));
//! println!("{}", result.python);
//! ```

pub mod analysis;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod dnf;
pub mod error;
pub mod lexer;
pub mod onf;
pub mod parser;
pub mod shape;
pub mod symbol;

pub use analysis::metric_flops;
pub use ast::{node_traversal, render_tree, Context, Element, Node, NodeRef, NodeSymbol, Traversal};
pub use codegen::{generate_python_function, generate_python_source, PythonGenerator};
pub use config::CompilerConfig;
pub use dnf::{reduce_to_dnf, reduce_to_dnf_bounded};
pub use error::{CompileError, CompileResult};
pub use onf::reduce_to_onf;
pub use parser::parse;
pub use shape::calculate_shapes;
pub use symbol::{join_symbol_tables, SymbolTable};

/// Every intermediate form produced while compiling one expression
#[derive(Debug, Clone)]
pub struct Compilation {
    pub parsed: Context,
    pub shaped: Context,
    pub reduced: Context,
    pub lowered: Context,
    pub python: String,
}

impl Compilation {
    /// Flop counts of the shaped and reduced trees
    pub fn flops(&self) -> CompileResult<(i64, i64)> {
        Ok((metric_flops(&self.shaped)?, metric_flops(&self.reduced)?))
    }
}

/// Main compilation function that takes a MOA expression and produces Python source
pub fn compile(source: &str, config: &CompilerConfig) -> CompileResult<Compilation> {
    let parsed = parse(source)?;
    let shaped = calculate_shapes(parsed.clone())?;
    let reduced = reduce_to_dnf_bounded(shaped.clone(), config.max_rewrite_iterations)?;
    let lowered = reduce_to_onf(reduced.clone(), config.include_conditions)?;
    let python = generate_python_function(&lowered, &config.function_name, config.materialize_scalars)?;

    Ok(Compilation {
        parsed,
        shaped,
        reduced,
        lowered,
        python,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_lenore_example() {
        let result = compile(
            "<0> psi (tran (A ^ <3 4> + B ^ <3 4>))",
            &CompilerConfig::new("lenore"),
        )
        .unwrap();

        assert_eq!(result.parsed.ast.symbol, NodeSymbol::Psi);
        assert_eq!(result.shaped.ast.shape, Some(ast::dims(&[3])));
        assert_eq!(generate_python_source(&result.reduced).unwrap(), "(A[(_i3, 0)] + B[(_i3, 0)])");
        assert_eq!(result.lowered.ast.symbol, NodeSymbol::Function);
        assert!(result.python.contains("def lenore(A, B):"));
    }

    #[test]
    fn test_compile_without_conditions() {
        let config = CompilerConfig {
            include_conditions: false,
            ..CompilerConfig::default()
        };
        let result = compile("A ^ <n 3> + B ^ <m 3>", &config).unwrap();
        assert!(!result.python.contains("raise"));
        assert!(result.python.contains("    m = B.shape[0]\n"));
    }

    #[test]
    fn test_compile_assignment() {
        let result = compile("C ^ <3> := A ^ <3> + B ^ <3>", &CompilerConfig::default()).unwrap();
        assert!(result.python.contains("def moa_function(A, B, C):\n"));
        assert!(result.python.contains(
            "    for _i3 in range(0, 3, 1):\n        C[(_i3,)] = (A[(_i3,)] + B[(_i3,)])\n"
        ));
        assert!(result.python.ends_with("    return C\n"));
        assert!(!result.python.contains("numpy.zeros"));
    }

    #[test]
    fn test_compile_flops() {
        let result = compile(
            "<0> psi (tran (A ^ <10 100> + B ^ <10 100>))",
            &CompilerConfig::default(),
        )
        .unwrap();
        assert_eq!(result.flops().unwrap(), (1000, 10));
    }

    #[test]
    fn test_compile_reports_first_failing_stage() {
        assert!(matches!(
            compile("A ^ <2 3> + B ^ <3 2>", &CompilerConfig::default()),
            Err(CompileError::ShapeError { .. })
        ));
        assert!(matches!(
            compile("A +", &CompilerConfig::default()),
            Err(CompileError::ParseError { .. })
        ));
    }

    #[test]
    fn test_compile_respects_iteration_limit() {
        let config = CompilerConfig {
            max_rewrite_iterations: 1,
            ..CompilerConfig::default()
        };
        assert!(matches!(
            compile("<0> psi (tran (A ^ <3 4> + B ^ <3 4>))", &config),
            Err(CompileError::ReductionNonconvergence { limit: 1, .. })
        ));
    }
}
