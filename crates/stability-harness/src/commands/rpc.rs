//! `rpc`: replay RPC commands against the node's RPC server

use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use stability_core::{
    dispatch, normalize_address, HarnessContext, JsonLines, JsonRpcClient, RpcCommand, RpcSink,
    WorkloadReader, DEFAULT_RPC_PORT,
};

#[derive(clap::Args, Debug)]
pub struct RpcArgs {
    /// RPC server address (host or host:port)
    #[arg(long)]
    pub rpc_server: String,

    /// JSON-lines file with one RPC command per line
    #[arg(long)]
    pub commands_file: PathBuf,
}

pub async fn run(args: RpcArgs, context: &HarnessContext) -> anyhow::Result<ExitCode> {
    let address =
        normalize_address(&args.rpc_server, DEFAULT_RPC_PORT).context("error parsing RPC address")?;

    let client = JsonRpcClient::connect(&address)
        .await
        .context("error connecting to RPC server")?;
    info!(server = %address, "Connected to RPC server");

    let reader = WorkloadReader::open(&args.commands_file, JsonLines::<RpcCommand>::new())
        .await
        .with_context(|| {
            format!(
                "error reading commands from file {}",
                args.commands_file.display()
            )
        });
    let reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            client.disconnect().await;
            return Err(e);
        }
    };

    let mut sink = RpcSink::new(client);
    let result = dispatch(reader.spawn(context.spawner()), &mut sink).await;
    sink.into_session().disconnect().await;
    let summary = result.context("error sending commands")?;

    info!(
        commands = summary.submitted,
        elapsed = %humantime::format_duration(summary.elapsed),
        "Finished replaying commands"
    );
    Ok(ExitCode::SUCCESS)
}
