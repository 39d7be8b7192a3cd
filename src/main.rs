//! Command-line front end: compile a .bas file to IC10 assembly.

use ansi_term::Colour::{Red, Yellow};
use basicten::lang::{tokenize, Severity};
use basicten::mach::{compile, CompileOptions, LINE_LIMIT};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "basicten")]
#[command(version, about = "BASIC to IC10 MIPS compiler for Stationeers")]
struct Args {
    /// Input BASIC source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Strip comments and blank lines from the output
    #[arg(short = 'O', long, default_value_t = 1)]
    optimize: u8,

    /// Print the token stream and exit
    #[arg(long)]
    tokens: bool,

    /// Print the parsed AST and exit
    #[arg(long)]
    ast: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error reading '{}': {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if args.tokens {
        return dump_tokens(&source);
    }
    if args.ast {
        return dump_ast(&source);
    }

    let options = CompileOptions {
        optimization_level: args.optimize,
        ..CompileOptions::default()
    };
    let result = compile(&source, &options);
    for diagnostic in &result.diagnostics {
        let line = match diagnostic.line {
            Some(line) => format!(" (line {})", line),
            None => String::new(),
        };
        match diagnostic.severity {
            Severity::Error => {
                eprintln!("{}{}: {}", Red.paint("error"), line, diagnostic.message)
            }
            Severity::Warning => {
                eprintln!("{}{}: {}", Yellow.paint("warning"), line, diagnostic.message)
            }
        }
    }
    if !result.success {
        return ExitCode::FAILURE;
    }
    let code = result.code.expect("successful compile carries code");
    if args.verbose {
        eprintln!(
            "{}: {} of {} lines used",
            args.input.display(),
            result.line_count,
            LINE_LIMIT
        );
    }
    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &code) {
                eprintln!("error writing '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
        None => print!("{}", code),
    }
    ExitCode::SUCCESS
}

fn dump_tokens(source: &str) -> ExitCode {
    match tokenize(source, true) {
        Ok(tokens) => {
            for token in tokens {
                println!("{}:{}\t{:?}", token.line, token.column, token.kind);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", Red.paint("error"), e);
            ExitCode::FAILURE
        }
    }
}

fn dump_ast(source: &str) -> ExitCode {
    let tokens = match tokenize(source, false) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("{}: {}", Red.paint("error"), e);
            return ExitCode::FAILURE;
        }
    };
    match basicten::lang::parse(&tokens) {
        Ok(program) => {
            println!("{:#?}", program);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", Red.paint("error"), e);
            ExitCode::FAILURE
        }
    }
}
