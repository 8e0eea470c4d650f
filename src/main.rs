//! MOA Compiler CLI
//!
//! Usage:
//!   moac "<0> psi (tran (A ^ <3 4> + B ^ <3 4>))"
//!   moac -f expr.moa --stage dnf --flops
//!   moac "A ^ <n 3> + B ^ <m 3>" --no-conditions --json

use clap::{Parser as ClapParser, ValueEnum};
use colored::Colorize;
use std::fs;
use std::io::{self, Read};

use moa_compiler::{
    calculate_shapes, generate_python_function, metric_flops, parse, reduce_to_dnf_bounded,
    reduce_to_onf, render_tree, CompileError, CompileResult, CompilerConfig, Context,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    /// Shape inference
    Shape,
    /// Denotational normal form
    Dnf,
    /// Operational normal form
    Onf,
    /// Python source
    Python,
}

#[derive(ClapParser, Debug)]
#[command(name = "moac")]
#[command(author = "MOA Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles Mathematics of Arrays expressions to Python loop nests")]
struct Args {
    /// MOA expression to compile (e.g., "A ^ <3 4> + B ^ <3 4>")
    #[arg(value_name = "EXPR")]
    expression: Option<String>,

    /// Read expression from file
    #[arg(short = 'f', long = "file")]
    input_file: Option<String>,

    /// Last stage to run
    #[arg(long = "stage", value_enum, default_value = "python")]
    stage: Stage,

    /// Output the final stage as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Omit runtime guards on argument shapes
    #[arg(long = "no-conditions")]
    no_conditions: bool,

    /// Rewrites allowed at one node during reduction
    #[arg(long = "max-iterations")]
    max_iterations: Option<usize>,

    /// Load compiler options from a JSON file
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Report flop counts before and after reduction
    #[arg(long = "flops")]
    flops: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn fail(kind: &str, message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", kind.red(), message);
    std::process::exit(1);
}

fn read_input(args: &Args) -> String {
    if let Some(expr) = &args.expression {
        expr.clone()
    } else if let Some(file) = &args.input_file {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read file '{}': {}", file, e)))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read stdin: {}", e)));
        buffer
    }
}

fn load_config(args: &Args) -> CompileResult<CompilerConfig> {
    let mut config = match &args.config_file {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| CompileError::config(format!("failed to read '{}': {}", path, e)))?;
            CompilerConfig::from_json(&json)?
        }
        None => CompilerConfig::default(),
    };
    if args.no_conditions {
        config.include_conditions = false;
    }
    if let Some(max) = args.max_iterations {
        config.max_rewrite_iterations = max;
    }
    Ok(config)
}

fn print_stage(title: &str, context: &Context) {
    println!("{}", title.bold().green());
    println!("{}", "=".repeat(50));
    print!("{}", render_tree(context));
    println!();
}

fn print_flops(shaped: &Context, reduced: Option<&Context>) -> CompileResult<()> {
    println!("{}: {}", "Flops (shaped)".cyan(), metric_flops(shaped)?);
    if let Some(reduced) = reduced {
        println!("{}: {}", "Flops (reduced)".cyan(), metric_flops(reduced)?);
    }
    Ok(())
}

fn run(args: &Args, source: &str) -> CompileResult<()> {
    let config = load_config(args)?;

    if args.verbose {
        println!("{}", "Mathematics of Arrays Compiler".bold().blue());
        println!("{}", "=".repeat(30));
        println!();
        println!("{}: {}", "Input".green(), source.trim());
        println!("{}: {:?}", "Stage".green(), args.stage);
        println!();
    }

    let parsed = parse(source)?;
    if args.verbose {
        print_stage("Parsed", &parsed);
    }

    let shaped = calculate_shapes(parsed)?;
    let mut last = shaped.clone();
    let mut reduced = None;

    if args.stage >= Stage::Dnf {
        if args.verbose {
            print_stage("Shaped", &shaped);
        }
        let dnf = reduce_to_dnf_bounded(shaped.clone(), config.max_rewrite_iterations)?;
        last = dnf.clone();
        reduced = Some(dnf);
    }

    if args.stage >= Stage::Onf {
        if let Some(dnf) = &reduced {
            if args.verbose {
                print_stage("Reduced", dnf);
            }
            last = reduce_to_onf(dnf.clone(), config.include_conditions)?;
        }
    }

    if args.flops {
        print_flops(&shaped, reduced.as_ref())?;
        println!();
    }

    if args.json_output {
        let json = serde_json::to_string_pretty(&last)
            .map_err(|e| CompileError::codegen(format!("failed to serialize to JSON: {}", e)))?;
        println!("{}", json);
    } else if args.stage == Stage::Python {
        if args.verbose {
            print_stage("Lowered", &last);
            println!("{}", "Python".bold().green());
            println!("{}", "=".repeat(50));
        }
        print!(
            "{}",
            generate_python_function(&last, &config.function_name, config.materialize_scalars)?
        );
    } else {
        let title = match args.stage {
            Stage::Shape => "Shaped",
            Stage::Dnf => "Reduced",
            _ => "Lowered",
        };
        print_stage(title, &last);
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    let source = read_input(&args);

    if let Err(e) = run(&args, &source) {
        fail(e.kind(), e);
    }
}
