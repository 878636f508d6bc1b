//! eflint-run - Run eFLINT phrase requests against a fresh session
//!
//! The thinnest possible transport collaborator: reads one JSON request
//! (file or stdin), runs it through a session, prints the JSON response.
//!
//! # Usage
//!
//! ```bash
//! # Run a request file
//! eflint-run request.json
//!
//! # Pipe a request through stdin
//! eflint-to-json policy.eflint | eflint-run
//!
//! # Pretty-print the response, naive derivation
//! eflint-run --pretty --derivation naive request.json
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use colored::Colorize;

use eflint::session::Session;
use eflint::{Input, Strategy};

/// Run an eFLINT phrase request against a fresh session
#[derive(Parser, Debug)]
#[command(name = "eflint-run")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Request file; stdin when omitted
    input: Option<PathBuf>,

    /// Derivation strategy
    #[arg(short, long, value_enum, default_value = "assumption")]
    derivation: Derivation,

    /// Pretty-print the response
    #[arg(short, long)]
    pretty: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Derivation {
    /// Naive global fixed point
    Naive,
    /// Dependency-driven work queue
    Queue,
    /// Dependency-driven with assumption/rollback
    Assumption,
}

impl From<Derivation> for Strategy {
    fn from(value: Derivation) -> Strategy {
        match value {
            Derivation::Naive => Strategy::Naive,
            Derivation::Queue => Strategy::Queue,
            Derivation::Assumption => Strategy::Assumption,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let input: Input = serde_json::from_str(&raw)?;

    let mut session = Session::new(args.derivation.into());
    let response = session.handle(&input);

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{rendered}");
    Ok(())
}
