//! meshledger node binary.
//!
//! Runs one chain sync node with a JSON-RPC status surface.

use tracing_subscriber::EnvFilter;

use meshledger_node::cli::Cli;
use meshledger_node::config::NodeConfig;
use meshledger_node::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    let config = NodeConfig::from_cli(&cli);

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("meshledger node v{}", env!("CARGO_PKG_VERSION"));

    let node = Node::new(config);
    node.run().await?;

    Ok(())
}
