//! Node orchestrator.
//!
//! Coordinates the node components: the ledger, the P2P sync node and the
//! JSON-RPC server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshledger_ledger::{InMemoryLedger, Ledger, SameGenesis};
use meshledger_p2p::{P2pResult, SyncNode, SyncService};

use crate::config::NodeConfig;
use crate::rpc::{self, RpcServerHandle, RpcState};
use crate::shutdown::{shutdown_channel, wait_for_shutdown_signal, ShutdownGuard, ShutdownTx};

/// Time allowed for the P2P task to stop.
const P2P_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The main node structure.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,

    /// Local ledger shared with the sync node and RPC handlers.
    ledger: Arc<dyn Ledger>,

    /// Shutdown signal sender.
    shutdown_tx: ShutdownTx,
}

/// Handles to a started node.
pub struct RunningNode {
    /// Address the P2P listener is bound to.
    pub p2p_addr: SocketAddr,

    /// Address the RPC server is bound to.
    pub rpc_addr: SocketAddr,

    /// Sync service of the P2P node.
    pub service: SyncService,

    rpc: RpcServerHandle,
    p2p_shutdown: CancellationToken,
    p2p_task: JoinHandle<P2pResult<()>>,
}

impl Node {
    /// Create a new node with the given configuration.
    pub fn new(config: NodeConfig) -> Self {
        let ledger = if config.genesis {
            InMemoryLedger::with_genesis()
        } else {
            InMemoryLedger::new()
        }
        .with_validator(SameGenesis);

        tracing::info!(
            chain_len = ledger.len(),
            fork_choice = ledger.fork_choice_name(),
            "Ledger initialized"
        );

        Self::with_ledger(config, Arc::new(ledger))
    }

    /// Create a node over an existing ledger.
    pub fn with_ledger(config: NodeConfig, ledger: Arc<dyn Ledger>) -> Self {
        let (shutdown_tx, _) = shutdown_channel();
        Self {
            config,
            ledger,
            shutdown_tx,
        }
    }

    /// The local ledger.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Sender that stops [`Node::run`] when signalled.
    pub fn shutdown_handle(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Start the P2P node and the RPC server.
    ///
    /// Returns once both are listening. Configuration and bind errors are
    /// returned here rather than from the background task.
    pub async fn start(&self) -> anyhow::Result<RunningNode> {
        let p2p_config = self.config.p2p_config();
        p2p_config.validate()?;

        let mut sync_node = SyncNode::new(p2p_config, Arc::clone(&self.ledger));
        let addr_rx = sync_node.bound_addr_receiver();
        let p2p_shutdown = sync_node.shutdown_handle();
        let service = sync_node.service();

        let p2p_task = tokio::spawn(sync_node.run());

        let p2p_addr = match addr_rx.await {
            Ok(addr) => addr,
            Err(_) => {
                // The sender is dropped only when run() returns before binding.
                return match p2p_task.await? {
                    Ok(()) => Err(anyhow::anyhow!("P2P node stopped before binding")),
                    Err(e) => Err(e.into()),
                };
            }
        };

        let state = Arc::new(RpcState::new(service.clone(), p2p_addr));
        let rpc = match rpc::start_rpc_server(self.config.rpc_addr, state).await {
            Ok(rpc) => rpc,
            Err(e) => {
                p2p_shutdown.cancel();
                let _ = p2p_task.await;
                return Err(e);
            }
        };

        Ok(RunningNode {
            p2p_addr,
            rpc_addr: rpc.local_addr(),
            service,
            rpc,
            p2p_shutdown,
            p2p_task,
        })
    }

    /// Run the node until SIGINT, SIGTERM or the shutdown handle fires.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Starting meshledger node");
        tracing::info!("  P2P address: {}", self.config.p2p_addr);
        tracing::info!("  RPC address: {}", self.config.rpc_addr);
        tracing::info!("  Configured peers: {}", self.config.peers.len());

        let mut guard = ShutdownGuard::new(&self.shutdown_tx);
        let running = self.start().await?;

        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                }
            }
            _ = guard.wait() => {
                tracing::info!("Shutdown requested");
            }
        }

        tracing::info!("Shutting down node");
        running.stop().await?;
        tracing::info!("Node shutdown complete");
        Ok(())
    }
}

impl RunningNode {
    /// Stop the RPC server and the P2P node.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.rpc.stop()?;
        self.rpc.stopped().await;
        tracing::info!("RPC server stopped");

        self.p2p_shutdown.cancel();
        match tokio::time::timeout(P2P_STOP_TIMEOUT, self.p2p_task).await {
            Ok(joined) => joined??,
            Err(_) => tracing::warn!("P2P node did not stop in time"),
        }
        tracing::info!("P2P node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> NodeConfig {
        NodeConfig {
            p2p_addr: "127.0.0.1:0".parse().unwrap(),
            rpc_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_genesis_flag_seeds_ledger() {
        let node = Node::new(local_config());
        assert_eq!(node.ledger().len(), 1);

        let node = Node::new(NodeConfig {
            genesis: false,
            ..local_config()
        });
        assert!(node.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_start_fails_without_required_peers() {
        let node = Node::new(NodeConfig {
            require_peers: true,
            ..local_config()
        });

        assert!(node.start().await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_handle() {
        let node = Arc::new(Node::new(local_config()));
        let shutdown = node.shutdown_handle();

        let runner = Arc::clone(&node);
        let handle = tokio::spawn(async move { runner.run().await });

        // Give run() time to subscribe and bind.
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_start_reports_bound_addresses() {
        let node = Node::new(local_config());
        let running = node.start().await.unwrap();

        assert_ne!(running.p2p_addr.port(), 0);
        assert_ne!(running.rpc_addr.port(), 0);
        assert_eq!(running.service.ledger().len(), 1);

        running.stop().await.unwrap();
    }
}
