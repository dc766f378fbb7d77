mod cli;
mod output;
mod runner;

use crate::cli::Cli;
use crate::runner::{embedder_name, run};
use clap::Parser;
use riddle_eval::EvalError;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = real_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn real_main() -> Result<(), EvalError> {
    let cli = Cli::parse();
    let outcome = run(&cli)?;
    output::print_outcome(cli.output, &embedder_name(&cli), &outcome)
}
