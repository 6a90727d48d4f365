//! Peer-to-peer TCP transport (§4.4). The core owns the wire format
//! end to end: length-prefixed, bincode-encoded [`SyncMessage`]
//! envelopes over a plain TCP stream, with no external HTTP/WebSocket
//! gateway in between.
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{CollectiveError, CollectiveResult};
use crate::sync::envelope::SyncMessage;

/// Largest single envelope accepted from a peer; guards against a
/// malformed or hostile length prefix triggering an unbounded
/// allocation.
const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// A single peer connection carrying framed `SyncMessage`s in both
/// directions. Used both for the long-lived push stream and for
/// request/response pulls (§4.4): the framing is identical, only the
/// calling pattern differs.
pub struct PeerConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl PeerConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { stream, peer_addr }
    }

    pub async fn connect(addr: SocketAddr) -> CollectiveResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CollectiveError::unavailable(format!("failed to connect to {addr}: {e}"), Some(250)))?;
        Ok(Self::new(stream, addr))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, message: &SyncMessage) -> CollectiveResult<()> {
        let framed = message.encode()?;
        if framed.len() - 4 > MAX_MESSAGE_SIZE {
            return Err(CollectiveError::validation(format!(
                "sync message too large: {} bytes",
                framed.len()
            )));
        }
        self.stream
            .write_all(&framed)
            .await
            .map_err(|e| CollectiveError::Transport(format!("failed to write to {}: {e}", self.peer_addr)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| CollectiveError::Transport(format!("failed to flush to {}: {e}", self.peer_addr)))
    }

    pub async fn receive(&mut self) -> CollectiveResult<SyncMessage> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| CollectiveError::Transport(format!("failed to read length from {}: {e}", self.peer_addr)))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(CollectiveError::validation(format!("peer sent oversized message: {len} bytes")));
        }

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| CollectiveError::Transport(format!("failed to read body from {}: {e}", self.peer_addr)))?;
        SyncMessage::decode(&body)
    }

    pub async fn request(&mut self, message: &SyncMessage) -> CollectiveResult<SyncMessage> {
        self.send(message).await?;
        self.receive().await
    }
}

/// Listens for inbound peer connections on this machine's bind
/// address.
pub struct PeerListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerListener {
    pub async fn bind(addr: SocketAddr) -> CollectiveResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CollectiveError::internal(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CollectiveError::internal(format!("failed to read local addr: {e}")))?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> CollectiveResult<PeerConnection> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| CollectiveError::Transport(format!("failed to accept connection: {e}")))?;
        Ok(PeerConnection::new(stream, peer_addr))
    }
}
