//! P2P configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{P2pError, P2pResult};

/// Maximum message size in bytes (8 MB).
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 6001;

/// Default maximum inbound connections.
pub const DEFAULT_MAX_INBOUND: usize = 32;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for one chain exchange round.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for delivering one broadcast to every peer.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the sync node.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,

    /// Peers to connect to on startup.
    pub peers: Vec<SocketAddr>,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// Deadline covering one send-then-receive exchange round.
    pub round_timeout: Duration,

    /// Deadline for one broadcast to be acknowledged by every peer.
    pub broadcast_timeout: Duration,

    /// Maximum number of inbound connections.
    pub max_inbound: usize,

    /// Refuse to start without at least one configured peer.
    pub require_peers: bool,

    /// Re-broadcast the local chain after a peer's chain replaced it.
    pub rebroadcast: bool,

    /// Retry configured peers that are not connected at this interval.
    pub reconnect_interval: Option<Duration>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            peers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
            max_inbound: DEFAULT_MAX_INBOUND,
            require_peers: false,
            rebroadcast: true,
            reconnect_interval: None,
        }
    }
}

impl P2pConfig {
    /// Create a new configuration with the specified bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the peers to connect to on startup.
    pub fn with_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.peers = peers;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the exchange round timeout.
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    /// Set the broadcast timeout.
    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    /// Set the maximum inbound connections.
    pub fn with_max_inbound(mut self, count: usize) -> Self {
        self.max_inbound = count;
        self
    }

    /// Require at least one configured peer.
    pub fn with_require_peers(mut self, require: bool) -> Self {
        self.require_peers = require;
        self
    }

    /// Enable or disable re-broadcast after a replacement.
    pub fn with_rebroadcast(mut self, rebroadcast: bool) -> Self {
        self.rebroadcast = rebroadcast;
        self
    }

    /// Set the reconnect interval for configured peers.
    pub fn with_reconnect_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Check the configuration before the node starts.
    pub fn validate(&self) -> P2pResult<()> {
        if self.require_peers && self.peers.is_empty() {
            return Err(P2pError::NoPeersConfigured);
        }

        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("round_timeout", self.round_timeout),
            ("broadcast_timeout", self.broadcast_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(P2pError::InvalidConfig(format!("{name} must be non-zero")));
        }

        if matches!(self.reconnect_interval, Some(interval) if interval.is_zero()) {
            return Err(P2pError::InvalidConfig(
                "reconnect_interval must be non-zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.peers.iter().find(|addr| !seen.insert(**addr)) {
            return Err(P2pError::InvalidConfig(format!("duplicate peer address {dup}")));
        }

        Ok(())
    }
}
