//! Transports that carry workload items to the node
//!
//! Two seams are consumed by the dispatcher:
//!
//! - [`BlockSubmitter`] - pushes a raw block to a named peer
//! - [`RpcSession`] - posts a command over a connected RPC session
//!
//! Minimal implementations are provided for both:
//!
//! - [`TcpPeerSubmitter`] - one TCP connection per peer; each block is sent
//!   as a frame of a 4-byte big-endian length followed by CBOR
//! - [`JsonRpcClient`] - newline-delimited JSON request/response over TCP

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::workload::{Block, RpcCommand};

/// Largest frame the peer channel accepts
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response returned by an RPC session
pub type RpcResponse = Value;

/// Submits a single block to a peer
#[async_trait]
pub trait BlockSubmitter: Send + Sync {
    /// Send `block` to the peer at `peer`
    async fn submit_block(&self, peer: &str, block: Block) -> Result<(), TransportError>;
}

/// Posts commands over a connected RPC session
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Send `command` and wait for its response
    async fn post(&self, command: &RpcCommand) -> Result<RpcResponse, TransportError>;
}

/// Encode `value` as a length-prefixed CBOR frame
pub fn encode_frame<T: Serialize>(value: &T, max: usize) -> Result<Bytes, TransportError> {
    let payload = serde_cbor::to_vec(value)?;
    if payload.len() > max {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }

    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(len);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Read one length-prefixed CBOR frame
///
/// Returns `None` on a clean end of stream before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R, max: usize) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(len) as usize;
    if size > max {
        return Err(TransportError::FrameTooLarge { size, max });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    serde_cbor::from_slice(&payload)
        .map(Some)
        .map_err(|e| TransportError::Decode(e.to_string()))
}

async fn open_stream(address: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let connect_err = |reason: String| TransportError::Connect {
        address: address.to_string(),
        reason,
    };
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| connect_err(format!("timed out after {}ms", timeout.as_millis())))?
        .map_err(|e| connect_err(e.to_string()))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Minimal peer channel: raw blocks over TCP
pub struct TcpPeerSubmitter {
    connections: Mutex<HashMap<String, TcpStream>>,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl Default for TcpPeerSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpPeerSubmitter {
    /// Create a submitter with default limits
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame size limit, capped at what the 4-byte length prefix can carry
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max.min(u32::MAX as usize);
        self
    }

    /// Frame size limit in effect
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Establish the connection to `peer` ahead of the first block
    pub async fn connect(&self, peer: &str) -> Result<(), TransportError> {
        let mut connections = self.connections.lock().await;
        if !connections.contains_key(peer) {
            let stream = open_stream(peer, self.connect_timeout).await?;
            info!(peer = %peer, "Connected to peer");
            connections.insert(peer.to_string(), stream);
        }
        Ok(())
    }

    /// Number of open peer connections
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl BlockSubmitter for TcpPeerSubmitter {
    async fn submit_block(&self, peer: &str, block: Block) -> Result<(), TransportError> {
        let frame = encode_frame(&block, self.max_frame_size)?;

        let mut connections = self.connections.lock().await;
        if !connections.contains_key(peer) {
            let stream = open_stream(peer, self.connect_timeout).await?;
            connections.insert(peer.to_string(), stream);
        }
        let stream = connections
            .get_mut(peer)
            .ok_or_else(|| TransportError::Closed(peer.to_string()))?;

        let written = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            // Drop the broken connection; the dispatcher stops on this error anyway
            connections.remove(peer);
            return Err(e.into());
        }
        Ok(())
    }
}

struct RpcConnection {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

/// Newline-delimited JSON RPC client
pub struct JsonRpcClient {
    address: String,
    connection: Mutex<Option<RpcConnection>>,
}

impl JsonRpcClient {
    /// Connect to the RPC server at `address`
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        Self::connect_with_timeout(address, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect with an explicit timeout
    pub async fn connect_with_timeout(
        address: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = open_stream(address, timeout).await?;
        let (read_half, write_half) = stream.into_split();
        info!(address = %address, "Connected to RPC server");

        Ok(Self {
            address: address.to_string(),
            connection: Mutex::new(Some(RpcConnection {
                reader: BufReader::new(read_half).lines(),
                writer: write_half,
            })),
        })
    }

    /// Server address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Close the session; later posts fail with [`TransportError::Closed`]
    pub async fn disconnect(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            let _ = connection.writer.shutdown().await;
            debug!(address = %self.address, "Disconnected from RPC server");
        }
    }
}

#[async_trait]
impl RpcSession for JsonRpcClient {
    async fn post(&self, command: &RpcCommand) -> Result<RpcResponse, TransportError> {
        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| TransportError::Closed("session disconnected".to_string()))?;

        let mut request = command.to_json();
        request.push('\n');
        connection.writer.write_all(request.as_bytes()).await?;
        connection.writer.flush().await?;

        let line = connection
            .reader
            .next_line()
            .await?
            .ok_or_else(|| TransportError::Closed("server closed the session".to_string()))?;

        let response: Value = serde_json::from_str(&line)?;
        match response.get("error") {
            Some(error) if !error.is_null() => Err(TransportError::Rpc(error.to_string())),
            _ => Ok(response),
        }
    }
}
