//! Stability Harness - stress runner for a long-running node
//!
//! Three programs share one binary:
//! - `sanity`: launch the node once per command-list line, killing hung runs
//! - `blocks`: stream raw blocks from a file to the node's P2P port
//! - `rpc`: replay RPC commands from a file against the node's RPC server

mod commands;

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;

use stability_core::{HarnessContext, LogConfig};

use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "stability-harness")]
#[command(about = "Stability tests for a long-running node")]
struct Args {
    /// Log filter directive (overridden by RUST_LOG when set)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            verbose: self.verbose,
            ..LogConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let context = HarnessContext::init(args.command.label(), &args.log_config())
        .context("error initializing logging")?;

    let result = match context.guard(commands::run(args.command, &context)).await {
        Some(result) => result,
        None => Ok(ExitCode::FAILURE),
    };
    context.close();
    result
}
