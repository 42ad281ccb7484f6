//! Subcommands of the stability harness

pub mod blocks;
pub mod rpc;
pub mod sanity;

use clap::Subcommand;
use std::process::ExitCode;

use stability_core::HarnessContext;

/// Stability programs
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the node once per command-list line, killing runs that hang
    Sanity(sanity::SanityArgs),
    /// Stream raw blocks from a file to the node's P2P port
    Blocks(blocks::BlocksArgs),
    /// Replay RPC commands from a file against the node's RPC server
    Rpc(rpc::RpcArgs),
}

impl Command {
    /// Program label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Command::Sanity(_) => "sanity",
            Command::Blocks(_) => "block-flood",
            Command::Rpc(_) => "rpc-stability",
        }
    }
}

/// Run the selected program
pub async fn run(command: Command, context: &HarnessContext) -> anyhow::Result<ExitCode> {
    match command {
        Command::Sanity(args) => sanity::run(args, context).await,
        Command::Blocks(args) => blocks::run(args, context).await,
        Command::Rpc(args) => rpc::run(args, context).await,
    }
}
