//! Example: Outer products, inner products and reductions
//!
//! Run with: cargo run --example products

use moa_compiler::{compile, CompilerConfig};

fn main() {
    println!("=== Products Example ===\n");

    let cases = [
        ("outer", "A ^ <3> .* B ^ <4>"),
        ("matmul", "A ^ <3 4> +.* B ^ <4 5>"),
        ("column_sums", "+red A ^ <3 4>"),
        ("total", "+red +red A ^ <3 4>"),
    ];

    for (name, source) in cases {
        println!("Expression: {}", source);
        let result = compile(source, &CompilerConfig::new(name)).unwrap();
        let (before, after) = result.flops().unwrap();
        println!("Flops: {} shaped, {} reduced\n", before, after);
        print!("{}", result.python);
        println!();
    }
}
