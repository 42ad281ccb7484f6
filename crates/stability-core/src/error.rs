//! Error types for the stability harness
//!
//! Errors are split by how they propagate:
//!
//! - [`ConfigError`], [`SupervisorError`] are fatal and abort the current loop
//! - [`ExecutionError`] is recorded as data inside a
//!   [`CommandFailure`](crate::supervisor::CommandFailure) and never aborts
//! - [`TransportError`], [`WorkloadError`] stop a dispatch run and surface
//!   through [`DispatchError`]

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Invalid startup configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Log level directive could not be parsed
    #[error("Invalid log level '{level}': {reason}")]
    InvalidLogLevel { level: String, reason: String },

    /// A global subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Supervised program was not set
    #[error("Program path must not be empty")]
    EmptyProgram,

    /// Working directory flag is not a long option
    #[error("Invalid working directory flag '{0}': must start with '--'")]
    InvalidDirFlag(String),

    /// Address could not be parsed
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Fatal supervisor errors; any of these aborts the remaining iterations
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Working directory could not be created or reset
    #[error("Failed to prepare working directory {path}: {source}")]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Caller passed the reserved working directory flag
    #[error("Invalid argument '{argument}': {flag} is reserved for the working directory")]
    InvalidArgument { argument: String, flag: String },

    /// Timed-out process could not be terminated
    #[error("Failed to kill `{command}`: {source}")]
    Kill {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a run that finished within the timeout counts as failed
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Process exited with a non-success status
    #[error("{0}")]
    ExitStatus(ExitStatus),

    /// Process could not be started
    #[error("failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on the process failed
    #[error("failed to wait for exit: {0}")]
    Wait(#[source] std::io::Error),

    /// Exit notification was dropped without a result
    #[error("exit notification lost: waiter task terminated abnormally")]
    WaiterAborted,
}

/// Errors submitting a workload item to the node
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not connect to the remote end
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Item could not be encoded for the wire
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Response could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Encoded frame exceeds the configured limit
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Remote side answered with an error
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Session is no longer usable
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Errors reading a workload file
#[derive(Error, Debug)]
pub enum WorkloadError {
    /// File missing, unreadable or not a regular file
    #[error("Failed to open workload file {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// Read failed part way through the file
    #[error("Failed to read workload line {line}: {reason}")]
    Read { line: usize, reason: String },

    /// Line could not be decoded into an item
    #[error("Malformed workload item on line {line}: {reason}")]
    Decode { line: usize, reason: String },

    /// Decoder panicked; the rest of the file was not produced
    #[error("Workload producer aborted on line {line}: {reason}")]
    Aborted { line: usize, reason: String },
}

/// Errors that halt a dispatch run
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Transport rejected an item; nothing after it was submitted
    #[error("Failed to submit item {position} ({descriptor}): {source}")]
    Transport {
        position: usize,
        descriptor: String,
        #[source]
        source: TransportError,
    },

    /// Producer hit a terminal error
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

impl From<serde_cbor::Error> for TransportError {
    fn from(err: serde_cbor::Error) -> Self {
        TransportError::Encode(err.to_string())
    }
}
