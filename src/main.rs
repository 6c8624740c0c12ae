//! Binary entry point: logging, environment, CLI dispatch, exit codes.

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tracing_subscriber::EnvFilter;

use lira_rs::cli::{self, Cli};

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "lira_rs=debug" } else { "lira_rs=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs the command and prints its output, returning the exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let output = cli::execute(cli).await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", output.text.trim_end()).context("failed to write output")?;

    Ok(output.exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; only load errors in an existing one matter
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1)),
        Err(e) => {
            tracing::error!("command failed: {e:#}");
            ExitCode::from(1)
        }
    }
}
