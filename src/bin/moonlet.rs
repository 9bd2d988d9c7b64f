//! Interpreter command line.
//!
//! When called without arguments it drops into an interactive
//! read-evaluate-print loop.
//!
//! When called with arguments, it interprets the corresponding files in a
//! single interpreter session (so code and data sharing is possible).

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use moonlet::interpreter::Interpreter;
use moonlet::Value;

#[derive(Parser, Debug)]
#[command(version, about = "Run scripts, or start a REPL when no files are given")]
struct Args {
    /// Script files to run in order, sharing one global table.
    scripts: Vec<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    if args.scripts.is_empty() {
        run_prompt()
    } else {
        run_all_files(&args.scripts)
    }
}

fn run_all_files(paths: &[PathBuf]) -> Result<(), anyhow::Error> {
    let mut interp = Interpreter::new();
    for path in paths {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        interp
            .eval(&source)
            .with_context(|| format!("error in {}", path.display()))?;
    }
    Ok(())
}

fn run_prompt() -> Result<(), anyhow::Error> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    let mut interp = Interpreter::new();

    let mut input = String::new();
    loop {
        stdout.write_all(b"\n> ")?;
        stdout.flush()?;

        input.clear();
        let nbytes = stdin.read_line(&mut input)?;
        if nbytes == 0 {
            break;
        }

        match interp.eval(&input) {
            Ok(Value::Nil) => (),
            Ok(value) => println!("{}", value),
            Err(e) => println!("{}", e),
        }
    }

    Ok(())
}
