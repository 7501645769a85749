//! JSON-RPC server.
//!
//! A read-mostly status surface over the running node: the local chain,
//! the connected peers, and a trigger to push the local chain to them.

pub mod chain;
pub mod network;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;

use meshledger_ledger::Ledger;
use meshledger_p2p::SyncService;

/// Error code for a missing block.
pub const BLOCK_NOT_FOUND: i32 = -32001;

/// Error code for an internal failure.
pub const INTERNAL_ERROR: i32 = -32603;

/// Shared state for RPC handlers.
pub struct RpcState {
    /// Sync service of the running P2P node.
    pub service: SyncService,

    /// Address the P2P listener is bound to.
    pub p2p_addr: SocketAddr,

    /// When the node started.
    pub started_at: Instant,
}

impl RpcState {
    /// Create new RPC state.
    pub fn new(service: SyncService, p2p_addr: SocketAddr) -> Self {
        Self {
            service,
            p2p_addr,
            started_at: Instant::now(),
        }
    }

    /// The local ledger.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        self.service.ledger()
    }
}

/// Build the complete RPC module with all methods.
pub fn build_rpc_module(state: Arc<RpcState>) -> anyhow::Result<RpcModule<Arc<RpcState>>> {
    let mut module = RpcModule::new(state);

    chain::register_methods(&mut module)?;
    network::register_methods(&mut module)?;

    Ok(module)
}

/// RPC server handle with local address.
pub struct RpcServerHandle {
    /// The server handle for shutdown.
    handle: ServerHandle,
    /// The local address the server is bound to.
    local_addr: SocketAddr,
}

impl RpcServerHandle {
    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server.
    pub fn stop(&self) -> anyhow::Result<()> {
        self.handle
            .stop()
            .map_err(|e| anyhow::anyhow!("Failed to stop server: {:?}", e))
    }

    /// Wait until the server has stopped.
    pub async fn stopped(self) {
        self.handle.stopped().await
    }
}

/// Start the JSON-RPC server.
pub async fn start_rpc_server(addr: SocketAddr, state: Arc<RpcState>) -> anyhow::Result<RpcServerHandle> {
    let server = ServerBuilder::default().build(addr).await?;
    let local_addr = server.local_addr()?;

    let module = build_rpc_module(state)?;

    tracing::info!(addr = %local_addr, "Starting JSON-RPC server");

    let handle = server.start(module);

    Ok(RpcServerHandle { handle, local_addr })
}
