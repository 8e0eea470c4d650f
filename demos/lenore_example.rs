//! Example: Lenore's transpose-and-index expression
//!
//! Walks `<0> psi (tran (A + B))` through every stage and shows how indexing
//! pushed through the transpose leaves only one column of the sum to compute.
//!
//! Run with: cargo run --example lenore_example

use moa_compiler::{
    calculate_shapes, generate_python_function, generate_python_source, metric_flops, parse,
    reduce_to_dnf, reduce_to_onf, render_tree,
};

fn main() {
    println!("=== Lenore Example ===\n");

    let source = "<0> psi (tran (A ^ <10 100> + B ^ <10 100>))";
    println!("Expression: {}\n", source);

    let parsed = parse(source).unwrap();
    let shaped = calculate_shapes(parsed).unwrap();
    println!("Shaped tree:");
    print!("{}", render_tree(&shaped));
    println!("Flops: {}\n", metric_flops(&shaped).unwrap());

    let reduced = reduce_to_dnf(shaped).unwrap();
    println!("Reduced tree:");
    print!("{}", render_tree(&reduced));
    println!("Flops: {}", metric_flops(&reduced).unwrap());
    println!("Expression: {}\n", generate_python_source(&reduced).unwrap());

    let lowered = reduce_to_onf(reduced, true).unwrap();
    println!("Generated Python:");
    print!("{}", generate_python_function(&lowered, "lenore", true).unwrap());
}
