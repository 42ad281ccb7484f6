//! `sanity`: supervised node launches from a command list

use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::info;

use stability_core::{
    ArgumentLines, CommandFailure, HarnessContext, ProcessSupervisor, SupervisorConfig,
    WorkloadReader, DEFAULT_DIR_FLAG,
};

#[derive(clap::Args, Debug)]
pub struct SanityArgs {
    /// Node executable to supervise
    #[arg(long)]
    pub node_bin: PathBuf,

    /// File with one argument set per line ('#' starts a comment)
    #[arg(long)]
    pub command_list_file: PathBuf,

    /// Flag the node takes for its data directory; reserved for the harness
    #[arg(long, default_value = DEFAULT_DIR_FLAG)]
    pub dir_flag: String,

    /// Argument placed before the data directory flag (repeatable)
    #[arg(long = "launcher-arg", allow_hyphen_values = true)]
    pub launcher_args: Vec<String>,
}

pub async fn run(args: SanityArgs, context: &HarnessContext) -> anyhow::Result<ExitCode> {
    let failures = execute(args, context).await?;
    Ok(report(&failures))
}

/// Load the command list and drive the supervisor over it
pub async fn execute(
    args: SanityArgs,
    context: &HarnessContext,
) -> anyhow::Result<Vec<CommandFailure>> {
    let mut config = SupervisorConfig::new(&args.node_bin).with_launcher_args(args.launcher_args);
    config.dir_flag = args.dir_flag;
    config
        .validate()
        .context("error parsing configuration")?;

    let sets = WorkloadReader::open(&args.command_list_file, ArgumentLines)
        .await
        .with_context(|| {
            format!(
                "error reading command list {}",
                args.command_list_file.display()
            )
        })?
        .read_all(context.spawner())
        .await
        .with_context(|| {
            format!(
                "error parsing command list {}",
                args.command_list_file.display()
            )
        })?;
    info!(commands = sets.len(), "Loaded command list");

    let (args_tx, args_rx) = mpsc::channel(1);
    context.spawner().spawn("sanity-feed", async move {
        for set in sets {
            if args_tx.send(set).await.is_err() {
                break;
            }
        }
    });

    let supervisor = ProcessSupervisor::new(config, context.spawner().clone());
    supervisor
        .run(args_rx)
        .await
        .context("error in command loop")
}

fn report(failures: &[CommandFailure]) -> ExitCode {
    if failures.is_empty() {
        info!("All commands completed without failures");
        return ExitCode::SUCCESS;
    }

    eprintln!("{} command(s) failed:", failures.len());
    for line in failure_lines(failures) {
        eprintln!("  {}", line);
    }
    ExitCode::FAILURE
}

fn failure_lines(failures: &[CommandFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.failed_at.format("%Y-%m-%d %H:%M:%S"), f))
        .collect()
}
