//! Peer information and identification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique identifier for a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    /// We initiated the connection.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Unique peer identifier for this session.
    pub id: PeerId,
    /// Socket address of the peer.
    pub addr: SocketAddr,
    /// Direction of the connection.
    pub direction: ConnectionDirection,
    /// When the connection was established.
    pub connected_at: Instant,
    /// Set once the first exchange round has finished.
    pub live: bool,
    /// Length of the last chain this peer offered.
    pub last_remote_len: Option<usize>,
    /// Chains received from this peer, including pushes.
    pub rounds_completed: u64,
    /// Rounds that ended in failure.
    pub rounds_failed: u64,
    /// Times this peer's chain replaced ours.
    pub replacements: u64,
}

impl PeerInfo {
    /// Create info for a new peer connection.
    pub fn new(id: PeerId, addr: SocketAddr, direction: ConnectionDirection) -> Self {
        Self {
            id,
            addr,
            direction,
            connected_at: Instant::now(),
            live: false,
            last_remote_len: None,
            rounds_completed: 0,
            rounds_failed: 0,
            replacements: 0,
        }
    }

    /// Record a reconciled chain from this peer.
    pub fn record_reconciled(&mut self, remote_len: usize, replaced: bool) {
        self.rounds_completed += 1;
        self.last_remote_len = Some(remote_len);
        if replaced {
            self.replacements += 1;
        }
    }

    /// Record a failed round.
    pub fn record_failed(&mut self) {
        self.rounds_failed += 1;
    }

    /// Check if this is an outbound connection.
    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    /// Check if this is an inbound connection.
    pub fn is_inbound(&self) -> bool {
        self.direction == ConnectionDirection::Inbound
    }

    /// Get the connection duration.
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.addr, self.direction)?;
        if let Some(len) = self.last_remote_len {
            write!(f, " chain_len={len}")?;
        }
        Ok(())
    }
}
