//! Test utilities: mock transports and item builders
//!
//! Used by unit tests, the integration tests under `tests/`, and by anyone
//! wiring the dispatcher against a fake node.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use crate::dispatch::WorkloadSink;
use crate::error::TransportError;
use crate::transport::{BlockSubmitter, RpcResponse, RpcSession};
use crate::workload::{Block, RpcCommand};

/// Build a block whose `hash` member is `hash`
pub fn block(hash: &str) -> Block {
    match json!({"hash": hash, "header": {"version": 1}}) {
        serde_json::Value::Object(fields) => Block::new(fields),
        _ => unreachable!("json! object literal"),
    }
}

/// Build an RPC command for `method`
pub fn command(method: &str) -> RpcCommand {
    RpcCommand::try_from(json!({"method": method, "params": {}}))
        .unwrap_or_else(|e| panic!("invalid test command: {}", e))
}

/// Sink that records what it receives and can fail on a given attempt
#[derive(Debug)]
pub struct RecordingSink<T> {
    items: Vec<T>,
    attempts: usize,
    fail_on: Option<usize>,
}

impl<T> Default for RecordingSink<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            attempts: 0,
            fail_on: None,
        }
    }
}

impl<T> RecordingSink<T> {
    /// Create a sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th submission (1-based)
    pub fn fail_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Items accepted so far
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Submissions attempted, including the failed one
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl RecordingSink<Block> {
    /// Hashes of the accepted blocks, in order
    pub fn hashes(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|b| b.hash().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl<T: Send + 'static> WorkloadSink<T> for RecordingSink<T> {
    async fn submit(&mut self, item: T) -> Result<(), TransportError> {
        self.attempts += 1;
        if self.fail_on == Some(self.attempts) {
            return Err(TransportError::Closed(format!(
                "simulated failure on attempt {}",
                self.attempts
            )));
        }
        self.items.push(item);
        Ok(())
    }
}

/// Block submitter that records `(peer, hash)` pairs
#[derive(Debug, Clone, Default)]
pub struct MockSubmitter {
    submitted: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockSubmitter {
    /// Create an empty submitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything submitted so far
    pub fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl BlockSubmitter for MockSubmitter {
    async fn submit_block(&self, peer: &str, block: Block) -> Result<(), TransportError> {
        self.submitted.lock().push((
            peer.to_string(),
            block.hash().unwrap_or_default().to_string(),
        ));
        Ok(())
    }
}

/// RPC session that answers every command, failing chosen methods
#[derive(Debug, Clone, Default)]
pub struct MockRpcSession {
    methods: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl MockRpcSession {
    /// Create a session that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` with an RPC error
    pub fn fail_method(self, method: &str) -> Self {
        self.failing.lock().push(method.to_string());
        self
    }

    /// Methods posted so far, in order
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().clone()
    }
}

#[async_trait]
impl RpcSession for MockRpcSession {
    async fn post(&self, command: &RpcCommand) -> Result<RpcResponse, TransportError> {
        self.methods.lock().push(command.method().to_string());
        if self.failing.lock().iter().any(|m| m == command.method()) {
            return Err(TransportError::Rpc(format!("{} rejected", command.method())));
        }
        Ok(json!({"result": {}, "error": null}))
    }
}
