//! Node configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use meshledger_p2p::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, DEFAULT_ROUND_TIMEOUT};
use meshledger_p2p::P2pConfig;

use crate::cli::Cli;

/// Default JSON-RPC port.
pub const DEFAULT_RPC_PORT: u16 = 6002;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// P2P listen address.
    pub p2p_addr: SocketAddr,

    /// RPC listen address.
    pub rpc_addr: SocketAddr,

    /// Peers dialed at startup.
    pub peers: Vec<SocketAddr>,

    /// Fail startup when `peers` is empty.
    pub require_peers: bool,

    /// Deadline for one exchange round.
    pub round_timeout: Duration,

    /// Deadline for dialing a peer.
    pub connect_timeout: Duration,

    /// Redial period for configured peers, if any.
    pub reconnect_interval: Option<Duration>,

    /// Seed the ledger with the genesis block.
    pub genesis: bool,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            p2p_addr: cli.listen,
            rpc_addr: cli.rpc_listen,
            peers: cli.peers.clone().unwrap_or_default(),
            require_peers: cli.require_peers,
            round_timeout: Duration::from_millis(cli.round_timeout_ms),
            connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
            reconnect_interval: cli.reconnect_interval_secs.map(Duration::from_secs),
            genesis: !cli.no_genesis,
            log_level: cli.log_level.clone(),
        }
    }

    /// Build P2P configuration from node config.
    pub fn p2p_config(&self) -> P2pConfig {
        P2pConfig::new(self.p2p_addr)
            .with_peers(self.peers.clone())
            .with_require_peers(self.require_peers)
            .with_round_timeout(self.round_timeout)
            .with_connect_timeout(self.connect_timeout)
            .with_reconnect_interval(self.reconnect_interval)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            rpc_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_RPC_PORT)),
            peers: Vec::new(),
            require_peers: false,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: None,
            genesis: true,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.p2p_addr.port(), 6001);
        assert_eq!(config.rpc_addr.port(), 6002);
        assert!(config.genesis);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_from_cli_matches_default() {
        let cli = Cli::parse_from(["meshledger-node"]);
        let config = NodeConfig::from_cli(&cli);
        let default = NodeConfig::default();

        assert_eq!(config.p2p_addr, default.p2p_addr);
        assert_eq!(config.rpc_addr, default.rpc_addr);
        assert_eq!(config.round_timeout, default.round_timeout);
        assert_eq!(config.connect_timeout, default.connect_timeout);
    }

    #[test]
    fn test_p2p_config_carries_settings() {
        let cli = Cli::parse_from([
            "meshledger-node",
            "--listen",
            "127.0.0.1:7001",
            "--peers",
            "127.0.0.1:7002",
            "--require-peers",
            "--round-timeout-ms",
            "1500",
            "--reconnect-interval-secs",
            "2",
        ]);
        let p2p = NodeConfig::from_cli(&cli).p2p_config();

        assert_eq!(p2p.bind_addr.port(), 7001);
        assert_eq!(p2p.peers.len(), 1);
        assert!(p2p.require_peers);
        assert_eq!(p2p.round_timeout, Duration::from_millis(1500));
        assert_eq!(p2p.reconnect_interval, Some(Duration::from_secs(2)));
        assert!(p2p.validate().is_ok());
    }

    #[test]
    fn test_no_genesis_flag() {
        let cli = Cli::parse_from(["meshledger-node", "--no-genesis"]);
        assert!(!NodeConfig::from_cli(&cli).genesis);
    }

    #[test]
    fn test_log_level_from_cli() {
        let cli = Cli::parse_from(["meshledger-node", "--log-level", "debug"]);
        assert_eq!(NodeConfig::from_cli(&cli).log_level, "debug");
    }
}
