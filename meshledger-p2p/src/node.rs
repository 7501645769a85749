//! Main sync node orchestrator.
//!
//! `SyncNode` owns the listener and hands every accepted or dialed
//! connection to its own session task. Shutdown is a cancellation token:
//! every link scope is a child of it, so cancelling it ends all sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use meshledger_ledger::Ledger;

use crate::config::P2pConfig;
use crate::error::P2pResult;
use crate::peer::{ConnectionDirection, PeerId, PeerLink};
use crate::registry::{InboundListener, PeerRegistry};
use crate::sync::{session, SyncService};

/// Time allowed for session tasks to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Main sync node.
pub struct SyncNode {
    /// Node configuration.
    config: Arc<P2pConfig>,
    /// Exchange and broadcast logic shared with session tasks.
    service: SyncService,
    /// Cancelled to stop the node.
    shutdown: CancellationToken,
    /// Channel to send the bound address when the node starts.
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
}

impl SyncNode {
    /// Create a sync node over `ledger`.
    pub fn new(config: P2pConfig, ledger: Arc<dyn Ledger>) -> Self {
        let config = Arc::new(config);
        let registry = PeerRegistry::new(config.max_inbound);
        let service = SyncService::new(ledger, registry, Arc::clone(&config));

        Self {
            config,
            service,
            shutdown: CancellationToken::new(),
            bound_addr_tx: None,
        }
    }

    /// Get a oneshot receiver that will receive the bound address when the node starts.
    /// This is useful for tests that need to know the actual port when using port 0.
    pub fn bound_addr_receiver(&mut self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.bound_addr_tx = Some(tx);
        rx
    }

    /// Get the token that stops the node when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get a handle to the sync service.
    pub fn service(&self) -> SyncService {
        self.service.clone()
    }

    /// Get a handle to the peer registry.
    pub fn registry(&self) -> PeerRegistry {
        self.service.registry().clone()
    }

    /// Take ownership of an inbound connection and start its session.
    pub fn accept_peer(&self, stream: TcpStream, addr: SocketAddr) -> PeerId {
        let id = self.service.registry().next_peer_id();
        let link = PeerLink::from_stream(id, addr, ConnectionDirection::Inbound, stream);
        spawn_session(&self.service, &self.shutdown, link);
        id
    }

    /// Dial every configured peer that has no link yet. Returns how many
    /// connected.
    pub async fn connect_configured_peers(&self) -> usize {
        dial_missing(self.service.clone(), self.shutdown.clone()).await
    }

    /// Dial configured peers on the task tracker so the accept loop keeps
    /// running while connects are pending.
    fn spawn_dial(&self) -> JoinHandle<usize> {
        self.service
            .tasks()
            .spawn(dial_missing(self.service.clone(), self.shutdown.clone()))
    }

    /// Run the sync node until the shutdown handle is cancelled.
    ///
    /// Fails only on startup errors: an invalid configuration or a listener
    /// that cannot be bound.
    pub async fn run(mut self) -> P2pResult<()> {
        self.config.validate()?;

        let listener = InboundListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr();
        tracing::info!(
            addr = %local_addr,
            peers = self.config.peers.len(),
            chain_len = self.service.ledger().len(),
            "Sync node listening"
        );

        if let Some(tx) = self.bound_addr_tx.take() {
            let _ = tx.send(local_addr);
        }

        let mut dialing = self.spawn_dial();
        let mut reconnect_timer = self.config.reconnect_interval.map(reconnect_timer);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Sync node shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let peer = self.accept_peer(stream, addr);
                            tracing::debug!(peer = %peer, addr = %addr, "Accepted inbound");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept error");
                        }
                    }
                }

                _ = tick(reconnect_timer.as_mut()) => {
                    if dialing.is_finished() {
                        dialing = self.spawn_dial();
                    } else {
                        tracing::debug!("Previous dial still running, skipping reconnect");
                    }
                }
            }
        }

        self.shutdown_sessions().await;
        Ok(())
    }

    async fn shutdown_sessions(&self) {
        let registry = self.service.registry();
        let count = registry.close_all("shutdown").await;
        tracing::info!(count, "Shutting down peer connections");

        let tasks = self.service.tasks();
        tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
            tracing::warn!(remaining = tasks.len(), "Peer tasks still running after shutdown grace");
        }
    }
}

fn spawn_session(service: &SyncService, shutdown: &CancellationToken, link: PeerLink) {
    let link = link.with_parent_scope(shutdown);
    service
        .tasks()
        .spawn(session::run_session(service.clone(), link));
}

async fn dial_missing(service: SyncService, shutdown: CancellationToken) -> usize {
    let registry = service.registry();
    let config = service.config();

    let mut missing = Vec::new();
    for addr in &config.peers {
        if !registry.is_connected(addr).await {
            missing.push(*addr);
        }
    }
    if missing.is_empty() {
        return 0;
    }

    let results = tokio::select! {
        _ = shutdown.cancelled() => return 0,
        results = registry.connect_all(&missing, config.connect_timeout) => results,
    };

    let mut connected = 0;
    for (addr, result) in results {
        match result {
            Ok(link) => {
                tracing::debug!(peer = %link.id(), addr = %addr, "Outbound connection established");
                spawn_session(&service, &shutdown, link);
                connected += 1;
            }
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Failed to connect to peer");
            }
        }
    }
    tracing::info!(connected, attempted = missing.len(), "Dialed configured peers");
    connected
}

fn reconnect_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::P2pError;
    use meshledger_ledger::{genesis_block, Block, Chain, InMemoryLedger};
    use serde_json::json;

    #[tokio::test]
    async fn test_run_fails_without_required_peers() {
        let config = P2pConfig::new("127.0.0.1:0".parse().unwrap()).with_require_peers(true);
        let node = SyncNode::new(config, Arc::new(InMemoryLedger::with_genesis()));

        let result = node.run().await;
        assert!(matches!(result, Err(P2pError::NoPeersConfigured)));
    }

    #[tokio::test]
    async fn test_run_reports_bound_addr_and_stops() {
        let config = P2pConfig::new("127.0.0.1:0".parse().unwrap());
        let mut node = SyncNode::new(config, Arc::new(InMemoryLedger::with_genesis()));
        let addr_rx = node.bound_addr_receiver();
        let shutdown = node.shutdown_handle();

        let handle = tokio::spawn(node.run());
        let addr = addr_rx.await.unwrap();
        assert_ne!(addr.port(), 0);

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_pending_dial_does_not_block_accept_or_shutdown() {
        // Non-routable address: the dial hangs until connect_timeout.
        let config = P2pConfig::new("127.0.0.1:0".parse().unwrap())
            .with_peers(vec!["10.255.255.1:6001".parse().unwrap()])
            .with_connect_timeout(Duration::from_secs(5));
        let longer = Chain::from_genesis(genesis_block())
            .with_block(Block::new(json!({ "index": 1 })).unwrap());
        let mut node_a = SyncNode::new(config, Arc::new(InMemoryLedger::from_chain(longer.clone())));
        let addr_rx = node_a.bound_addr_receiver();
        let shutdown_a = node_a.shutdown_handle();
        let handle_a = tokio::spawn(node_a.run());
        let addr_a = addr_rx.await.unwrap();

        let config_b = P2pConfig::new("127.0.0.1:0".parse().unwrap()).with_peers(vec![addr_a]);
        let ledger_b = Arc::new(InMemoryLedger::with_genesis());
        let node_b = SyncNode::new(config_b, ledger_b.clone());
        let shutdown_b = node_b.shutdown_handle();
        let handle_b = tokio::spawn(node_b.run());

        let mut synced = false;
        for _ in 0..200 {
            if ledger_b.len() == 2 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced, "B should sync while A's dial is pending");
        assert_eq!(*ledger_b.current_chain(), longer);

        let started = std::time::Instant::now();
        shutdown_a.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle_a)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_millis(1500));

        shutdown_b.cancel();
        handle_b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_configured_peers_skips_connected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = P2pConfig::new("127.0.0.1:0".parse().unwrap()).with_peers(vec![addr]);
        let node = SyncNode::new(config, Arc::new(InMemoryLedger::with_genesis()));

        let (connected, accepted) = tokio::join!(node.connect_configured_peers(), listener.accept());
        let (_stream, _) = accepted.unwrap();
        assert_eq!(connected, 1);

        for _ in 0..100 {
            if node.registry().is_connected(&addr).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(node.connect_configured_peers().await, 0);

        node.shutdown_handle().cancel();
    }
}
