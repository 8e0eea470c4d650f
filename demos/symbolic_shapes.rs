//! Example: Symbolic dimensions
//!
//! Array lengths named in the shape become function-time values read from
//! the arguments, and shape agreement that cannot be proven statically turns
//! into runtime guards.
//!
//! Run with: cargo run --example symbolic_shapes

use moa_compiler::{compile, render_tree, CompilerConfig};

fn main() {
    println!("=== Symbolic Shapes Example ===\n");

    // Same symbol on both sides: no condition needed
    let source = "A ^ <n 3> + B ^ <n 3>";
    println!("Expression: {}\n", source);
    let result = compile(source, &CompilerConfig::new("add_same")).unwrap();
    print!("{}", result.python);
    println!();

    // Different symbols: agreement is checked when the function runs
    let source = "A ^ <n 3> + B ^ <m 3>";
    println!("Expression: {}\n", source);
    let result = compile(source, &CompilerConfig::new("add_checked")).unwrap();
    println!("Shaped tree (condition hoisted to the root):");
    print!("{}", render_tree(&result.shaped));
    println!();
    print!("{}", result.python);
    println!();

    // Guards can be left out entirely
    let config = CompilerConfig {
        include_conditions: false,
        ..CompilerConfig::new("add_unchecked")
    };
    let result = compile(source, &config).unwrap();
    print!("{}", result.python);
}
