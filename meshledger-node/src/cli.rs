//! Command-line argument parsing.

use std::net::SocketAddr;

use clap::Parser;

/// meshledger chain sync node.
#[derive(Parser, Debug, Clone)]
#[command(name = "meshledger-node")]
#[command(about = "Peer-to-peer chain sync node with a longest-chain rule")]
#[command(version)]
pub struct Cli {
    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0:6001")]
    pub listen: SocketAddr,

    /// RPC listen address.
    #[arg(long, default_value = "127.0.0.1:6002")]
    pub rpc_listen: SocketAddr,

    /// Comma-separated list of peers to connect to at startup.
    #[arg(long, value_delimiter = ',')]
    pub peers: Option<Vec<SocketAddr>>,

    /// Refuse to start when no peers are configured.
    #[arg(long)]
    pub require_peers: bool,

    /// Deadline for one chain exchange round, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub round_timeout_ms: u64,

    /// Deadline for dialing a peer, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Redial configured peers that are not connected every N seconds.
    #[arg(long)]
    pub reconnect_interval_secs: Option<u64>,

    /// Start with an empty chain instead of the genesis block.
    #[arg(long)]
    pub no_genesis: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
