//! Stability Core - supervision engine for node stability tests
//!
//! This crate drives a long-running node under synthetic load and reports
//! what broke. It has two halves:
//!
//! - **Process supervision**: [`ProcessSupervisor`] launches the node once
//!   per argument set in a clean working directory, kills runs that exceed
//!   the timeout window and collects [`CommandFailure`]s
//! - **Workload replay**: [`WorkloadReader`] streams blocks or RPC commands
//!   from a file and [`dispatch`] submits them in order to a transport,
//!   stopping at the first error
//!
//! All background work runs through a [`Spawner`] so a panic in one unit is
//! logged and contained.
//!
//! # Example
//!
//! ```rust,no_run
//! use stability_core::{
//!     dispatch, HarnessContext, JsonLines, JsonRpcClient, LogConfig, RpcCommand, RpcSink,
//!     WorkloadReader,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = HarnessContext::init("rpc", &LogConfig::default())?;
//!
//!     let client = JsonRpcClient::connect("127.0.0.1:16110").await?;
//!     let reader = WorkloadReader::open("commands.jsonl", JsonLines::<RpcCommand>::new()).await?;
//!
//!     let mut sink = RpcSink::new(client);
//!     let summary = dispatch(reader.spawn(context.spawner()), &mut sink).await?;
//!     println!("sent {} commands", summary.submitted);
//!
//!     sink.into_session().disconnect().await;
//!     context.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod panics;
pub mod supervisor;
pub mod transport;
pub mod workload;

pub mod test_utils;

// Re-exports
pub use config::{
    normalize_address, LogConfig, SupervisorConfig, DEFAULT_DIR_FLAG, DEFAULT_P2P_PORT,
    DEFAULT_RPC_PORT, DEFAULT_RUN_TIMEOUT,
};
pub use context::HarnessContext;
pub use dispatch::{dispatch, DispatchSummary, PeerSink, RpcSink, WorkloadSink};
pub use error::{
    ConfigError, DispatchError, ExecutionError, SupervisorError, TransportError, WorkloadError,
};
pub use panics::{install_panic_hook, panic_message, SpawnStats, Spawner};
pub use supervisor::{inject_dir_arg, ArgumentSet, CommandFailure, ProcessSupervisor, RunOutcome};
pub use transport::{
    encode_frame, read_frame, BlockSubmitter, JsonRpcClient, RpcResponse, RpcSession,
    TcpPeerSubmitter, MAX_FRAME_SIZE,
};
pub use workload::{
    ArgumentLines, Block, Describe, JsonLines, LineCodec, RpcCommand, WorkloadEntry,
    WorkloadReader, WorkloadResult,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
