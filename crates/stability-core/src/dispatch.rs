//! Fail-fast workload dispatcher
//!
//! Drains a producer channel in order and hands each item to a
//! [`WorkloadSink`]. The first failure ends the run: the channel is dropped,
//! which stops the producer, and nothing after the failing item is
//! submitted.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{DispatchError, TransportError};
use crate::transport::{BlockSubmitter, RpcSession};
use crate::workload::{Block, Describe, RpcCommand, WorkloadResult};

/// Destination for workload items
#[async_trait]
pub trait WorkloadSink<T: Send + 'static>: Send {
    /// Submit one item, taking ownership of it
    async fn submit(&mut self, item: T) -> Result<(), TransportError>;
}

/// Sends blocks to one fixed peer
pub struct PeerSink<S> {
    submitter: S,
    peer: String,
}

impl<S: BlockSubmitter> PeerSink<S> {
    /// Route every block to `peer` through `submitter`
    pub fn new(submitter: S, peer: impl Into<String>) -> Self {
        Self {
            submitter,
            peer: peer.into(),
        }
    }

    /// Target peer address
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The wrapped submitter
    pub fn submitter(&self) -> &S {
        &self.submitter
    }
}

#[async_trait]
impl<S: BlockSubmitter> WorkloadSink<Block> for PeerSink<S> {
    async fn submit(&mut self, item: Block) -> Result<(), TransportError> {
        self.submitter.submit_block(&self.peer, item).await
    }
}

/// Posts commands to an RPC session, discarding successful responses
pub struct RpcSink<R> {
    session: R,
}

impl<R: RpcSession> RpcSink<R> {
    /// Wrap a connected session
    pub fn new(session: R) -> Self {
        Self { session }
    }

    /// The wrapped session
    pub fn session(&self) -> &R {
        &self.session
    }

    /// Unwrap the session, e.g. to disconnect it
    pub fn into_session(self) -> R {
        self.session
    }
}

#[async_trait]
impl<R: RpcSession> WorkloadSink<RpcCommand> for RpcSink<R> {
    async fn submit(&mut self, item: RpcCommand) -> Result<(), TransportError> {
        self.session.post(&item).await.map(|_| ())
    }
}

/// Result of a dispatch run that reached the end of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Items submitted
    pub submitted: usize,
    /// Time spent dispatching
    pub elapsed: Duration,
}

/// Submit every produced item in order, stopping at the first error
pub async fn dispatch<T, S>(
    mut items: mpsc::Receiver<WorkloadResult<T>>,
    sink: &mut S,
) -> Result<DispatchSummary, DispatchError>
where
    T: Describe + Send + 'static,
    S: WorkloadSink<T> + ?Sized,
{
    let started = Instant::now();
    let mut submitted = 0;

    while let Some(entry) = items.recv().await {
        let entry = entry?;
        let descriptor = entry.item.describe();
        if let Err(source) = sink.submit(entry.item).await {
            return Err(DispatchError::Transport {
                position: entry.position,
                descriptor,
                source,
            });
        }
        submitted += 1;
    }

    let summary = DispatchSummary {
        submitted,
        elapsed: started.elapsed(),
    };
    info!(
        submitted = summary.submitted,
        elapsed = %humantime::format_duration(Duration::from_millis(summary.elapsed.as_millis() as u64)),
        "Workload dispatched"
    );
    Ok(summary)
}
