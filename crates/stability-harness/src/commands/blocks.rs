//! `blocks`: stream raw blocks to the node's P2P port

use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use stability_core::{
    dispatch, normalize_address, Block, HarnessContext, JsonLines, PeerSink, TcpPeerSubmitter,
    WorkloadReader, DEFAULT_P2P_PORT,
};

#[derive(clap::Args, Debug)]
pub struct BlocksArgs {
    /// Node P2P address (host or host:port)
    #[arg(long)]
    pub node_p2p_address: String,

    /// JSON-lines file with one block per line
    #[arg(long)]
    pub blocks_file: PathBuf,
}

pub async fn run(args: BlocksArgs, context: &HarnessContext) -> anyhow::Result<ExitCode> {
    let peer = normalize_address(&args.node_p2p_address, DEFAULT_P2P_PORT)
        .context("error parsing P2P address")?;

    let submitter = TcpPeerSubmitter::new();
    submitter
        .connect(&peer)
        .await
        .context("error creating peer connection")?;
    info!(peer = %peer, "Connected to node");

    let reader = WorkloadReader::open(&args.blocks_file, JsonLines::<Block>::new())
        .await
        .with_context(|| format!("error reading blocks from file {}", args.blocks_file.display()))?;

    let mut sink = PeerSink::new(submitter, peer);
    let summary = dispatch(reader.spawn(context.spawner()), &mut sink)
        .await
        .context("error sending blocks")?;

    info!(
        blocks = summary.submitted,
        elapsed = %humantime::format_duration(summary.elapsed),
        "Finished sending blocks"
    );
    Ok(ExitCode::SUCCESS)
}
