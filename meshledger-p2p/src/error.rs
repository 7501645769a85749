//! P2P error types.
//!
//! Every per-peer failure is one of `ConnectError`, `SendError`,
//! `ReceiveError` or `DecodeError`. They end one exchange round for one peer
//! and are logged. `P2pError` wraps them together with the startup errors
//! that stop the node.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use meshledger_ledger::LedgerError;

/// Failure to open a link to a peer.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The peer did not accept the connection in time.
    #[error("Connection timeout to {addr}")]
    Timeout { addr: SocketAddr },

    /// The peer refused the connection or the network failed.
    #[error("Peer {addr} unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A live link to this endpoint already exists.
    #[error("Already connected to peer: {addr}")]
    AlreadyConnected { addr: SocketAddr },
}

/// Failure to deliver a message on a link.
#[derive(Debug, Error)]
pub enum SendError {
    /// The link was closed before or during the send.
    #[error("Link closed")]
    Closed,

    /// The peer did not drain the message in time.
    #[error("Send timeout")]
    Timeout,

    /// The message could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection broke while writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message exceeds maximum allowed size.
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Failure to read a message from a link.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// No message arrived before the deadline.
    #[error("Receive timeout")]
    Timeout,

    /// The peer closed the connection.
    #[error("Link closed")]
    Closed,

    /// The link's scope was cancelled while waiting.
    #[error("Receive cancelled")]
    Cancelled,

    /// The connection broke while reading.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent a frame that violates the framing rules.
    #[error("Framing error: {0}")]
    Framing(String),
}

/// A received payload is not a chain message.
#[derive(Debug, Error)]
#[error("Malformed chain payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// P2P-specific errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connecting to a peer failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Sending to a peer failed.
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    /// Receiving from a peer failed.
    #[error("Receive failed: {0}")]
    Receive(#[from] ReceiveError),

    /// The peer's payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The ledger rejected the peer's chain.
    #[error("Ledger rejected chain: {0}")]
    Ledger(#[from] LedgerError),

    /// Peer already connected.
    #[error("Already connected to peer: {addr}")]
    AlreadyConnected { addr: SocketAddr },

    /// Maximum inbound connections reached.
    #[error("Maximum inbound connections reached: {max}")]
    MaxInboundReached { max: usize },

    /// Peers are required but none were configured.
    #[error("No peers configured but at least one is required")]
    NoPeersConfigured,

    /// Configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Node is shutting down.
    #[error("Node shutting down")]
    Shutdown,
}

impl P2pError {
    /// Check if the error ended a round because the peer stayed silent.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            P2pError::Receive(ReceiveError::Timeout)
                | P2pError::Send(SendError::Timeout)
                | P2pError::Connect(ConnectError::Timeout { .. })
        )
    }
}

/// Result type for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;
