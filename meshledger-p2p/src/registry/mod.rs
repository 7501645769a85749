//! Peer registry.
//!
//! The registry is the set of live peer links. Each link is owned by its
//! session task; the registry holds only the link's metadata and a command
//! channel into that task. It enforces one link per endpoint and bounds
//! inbound connections.

pub mod inbound;
pub mod outbound;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;

use crate::error::{P2pError, P2pResult, SendError};
use crate::peer::{PeerId, PeerInfo, PeerLink};
use crate::protocol::ChainMessage;
use crate::sync::{Reconciliation, RoundOutcome};

pub use inbound::InboundListener;
pub use outbound::ConnectOutcome;

/// Command sent from the registry to a peer's session task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Send an encoded message and report the result.
    Send {
        body: Bytes,
        deadline: Instant,
        ack: oneshot::Sender<Result<(), SendError>>,
    },
    /// Close the link.
    Close { reason: String },
}

/// Result of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Peers that acknowledged delivery.
    pub delivered: Vec<PeerId>,
    /// Peers that did not, with the reason.
    pub failed: Vec<(PeerId, SendError)>,
}

impl BroadcastReport {
    /// Number of peers reached.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Number of peers that failed.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Check if every targeted peer was reached.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Entry {
    info: PeerInfo,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<PeerId, Entry>,
    by_address: HashMap<SocketAddr, PeerId>,
}

impl Inner {
    fn inbound_count(&self) -> usize {
        self.peers.values().filter(|e| e.info.is_inbound()).count()
    }
}

struct Shared {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    max_inbound: usize,
}

/// Handle to the set of connected peers. Cheap to clone.
#[derive(Clone)]
pub struct PeerRegistry {
    shared: Arc<Shared>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new(max_inbound: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner::default()),
                next_id: AtomicU64::new(1),
                max_inbound,
            }),
        }
    }

    /// Allocate a new peer ID.
    pub fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a link and return the receiving end of its command channel.
    ///
    /// Fails if the endpoint already has a link, or if the link is inbound
    /// and the inbound limit is reached.
    ///
    /// Links are keyed by socket address. An inbound link carries the
    /// peer's ephemeral source port, not its listen address, so two nodes
    /// that dial each other end up with two links: one outbound, one
    /// inbound. Both reconcile the same chains, which is harmless.
    pub async fn register(&self, link: &PeerLink) -> P2pResult<mpsc::UnboundedReceiver<PeerCommand>> {
        let info = link.info();
        let mut inner = self.shared.inner.write().await;

        if inner.by_address.contains_key(&info.addr) {
            return Err(P2pError::AlreadyConnected { addr: info.addr });
        }
        if info.is_inbound() && inner.inbound_count() >= self.shared.max_inbound {
            return Err(P2pError::MaxInboundReached {
                max: self.shared.max_inbound,
            });
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        tracing::debug!(peer = %info.id, addr = %info.addr, direction = %info.direction, "Registered peer");

        inner.by_address.insert(info.addr, info.id);
        inner.peers.insert(info.id, Entry { info, commands });

        Ok(receiver)
    }

    /// Remove a peer. Safe to call for a peer that was never registered.
    pub async fn unregister(&self, id: PeerId) -> Option<PeerInfo> {
        let mut inner = self.shared.inner.write().await;
        let entry = inner.peers.remove(&id)?;

        if inner.by_address.get(&entry.info.addr) == Some(&id) {
            inner.by_address.remove(&entry.info.addr);
        }

        tracing::debug!(peer = %id, addr = %entry.info.addr, "Unregistered peer");
        Some(entry.info)
    }

    /// Mark a peer as having finished its first round, making it a
    /// broadcast target.
    pub async fn mark_live(&self, id: PeerId) -> bool {
        let mut inner = self.shared.inner.write().await;
        match inner.peers.get_mut(&id) {
            Some(entry) => {
                entry.info.live = true;
                true
            }
            None => false,
        }
    }

    /// Record the outcome of a round with a peer.
    pub async fn record_round(&self, id: PeerId, outcome: &RoundOutcome) {
        let mut inner = self.shared.inner.write().await;
        let Some(entry) = inner.peers.get_mut(&id) else {
            return;
        };

        match outcome {
            RoundOutcome::Reconciled(Reconciliation::Replaced { new_len, .. }) => {
                entry.info.record_reconciled(*new_len, true);
            }
            RoundOutcome::Reconciled(Reconciliation::Kept { remote_len, .. }) => {
                entry.info.record_reconciled(*remote_len, false);
            }
            RoundOutcome::Reconciled(Reconciliation::PeerHadNoChain) => {
                entry.info.record_reconciled(0, false);
            }
            RoundOutcome::Failed(_) => entry.info.record_failed(),
        }
    }

    /// Check if a link to `addr` is registered.
    pub async fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.shared.inner.read().await.by_address.contains_key(addr)
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.shared.inner.read().await.peers.len()
    }

    /// Check if no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get a peer's info.
    pub async fn get(&self, id: PeerId) -> Option<PeerInfo> {
        self.shared
            .inner
            .read()
            .await
            .peers
            .get(&id)
            .map(|e| e.info.clone())
    }

    /// Snapshot of all registered peers, ordered by ID.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let inner = self.shared.inner.read().await;
        let mut peers: Vec<_> = inner.peers.values().map(|e| e.info.clone()).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Send `message` to every live peer except `exclude`.
    ///
    /// The set of targets is taken when the call starts. A peer that fails
    /// or does not acknowledge before `timeout` is reported in
    /// [`BroadcastReport::failed`] and does not hold up the others.
    pub async fn broadcast(
        &self,
        message: &ChainMessage,
        exclude: Option<PeerId>,
        timeout: Duration,
    ) -> P2pResult<BroadcastReport> {
        let body = message.encode()?;
        let deadline = Instant::now() + timeout;

        let mut targets: Vec<_> = {
            let inner = self.shared.inner.read().await;
            inner
                .peers
                .iter()
                .filter(|(id, entry)| entry.info.live && Some(**id) != exclude)
                .map(|(id, entry)| (*id, entry.commands.clone()))
                .collect()
        };
        targets.sort_by_key(|(id, _)| *id);

        let mut report = BroadcastReport::default();
        let mut pending = Vec::with_capacity(targets.len());

        for (id, commands) in targets {
            let (ack, ack_rx) = oneshot::channel();
            let command = PeerCommand::Send {
                body: body.clone(),
                deadline,
                ack,
            };
            if commands.send(command).is_err() {
                report.failed.push((id, SendError::Closed));
                continue;
            }
            pending.push((id, ack_rx));
        }

        for (id, ack_rx) in pending {
            match tokio::time::timeout_at(deadline, ack_rx).await {
                Ok(Ok(Ok(()))) => report.delivered.push(id),
                Ok(Ok(Err(e))) => report.failed.push((id, e)),
                Ok(Err(_)) => report.failed.push((id, SendError::Closed)),
                Err(_) => report.failed.push((id, SendError::Timeout)),
            }
        }

        for (id, error) in &report.failed {
            tracing::debug!(peer = %id, error = %error, "Broadcast to peer failed");
        }

        Ok(report)
    }

    /// Ask every registered peer's session to close. Returns how many were
    /// asked.
    pub async fn close_all(&self, reason: &str) -> usize {
        let inner = self.shared.inner.read().await;
        let mut asked = 0;
        for (id, entry) in &inner.peers {
            let command = PeerCommand::Close {
                reason: reason.to_string(),
            };
            if entry.commands.send(command).is_ok() {
                asked += 1;
            } else {
                tracing::trace!(peer = %id, "Session already gone");
            }
        }
        asked
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("max_inbound", &self.shared.max_inbound)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ConnectionDirection;
    use tokio::net::{TcpListener, TcpStream};

    async fn make_link(registry: &PeerRegistry, direction: ConnectionDirection) -> (PeerLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, remote) = accepted.unwrap();

        let link = PeerLink::from_stream(registry.next_peer_id(), remote, direction, server);
        (link, client.unwrap())
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = PeerRegistry::new(8);
        let (link, _client) = make_link(&registry, ConnectionDirection::Outbound).await;

        let _commands = registry.register(&link).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.is_connected(&link.addr()).await);

        let info = registry.unregister(link.id()).await.unwrap();
        assert_eq!(info.id, link.id());
        assert!(registry.is_empty().await);
        assert!(!registry.is_connected(&link.addr()).await);

        assert!(registry.unregister(link.id()).await.is_none());
        assert!(registry.unregister(PeerId::new(999)).await.is_none());
    }

    #[tokio::test]
    async fn test_one_link_per_endpoint() {
        let registry = PeerRegistry::new(8);
        let (link, _client) = make_link(&registry, ConnectionDirection::Outbound).await;
        let _commands = registry.register(&link).await.unwrap();

        let result = registry.register(&link).await;
        assert!(matches!(result, Err(P2pError::AlreadyConnected { .. })));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_mutual_dial_registers_two_links() {
        let registry = PeerRegistry::new(8);

        // Our dial to the peer's listen address.
        let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer_listener.local_addr().unwrap();
        let (dialed, _) = tokio::join!(TcpStream::connect(peer_addr), peer_listener.accept());
        let outbound = PeerLink::from_stream(
            registry.next_peer_id(),
            peer_addr,
            ConnectionDirection::Outbound,
            dialed.unwrap(),
        );

        // The peer's dial to us arrives from an ephemeral port.
        let (inbound, _client) = make_link(&registry, ConnectionDirection::Inbound).await;
        assert_ne!(inbound.addr(), peer_addr);

        let _out = registry.register(&outbound).await.unwrap();
        let _in = registry.register(&inbound).await.unwrap();

        assert_eq!(registry.len().await, 2);
        assert!(registry.is_connected(&peer_addr).await);
        assert!(registry.is_connected(&inbound.addr()).await);
    }

    #[tokio::test]
    async fn test_max_inbound() {
        let registry = PeerRegistry::new(1);
        let (first, _c1) = make_link(&registry, ConnectionDirection::Inbound).await;
        let (second, _c2) = make_link(&registry, ConnectionDirection::Inbound).await;
        let (outbound, _c3) = make_link(&registry, ConnectionDirection::Outbound).await;

        let _r1 = registry.register(&first).await.unwrap();
        assert!(matches!(
            registry.register(&second).await,
            Err(P2pError::MaxInboundReached { max: 1 })
        ));
        let _r3 = registry.register(&outbound).await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_collects_failures() {
        let registry = PeerRegistry::new(8);
        let (good, _c1) = make_link(&registry, ConnectionDirection::Outbound).await;
        let (gone, _c2) = make_link(&registry, ConnectionDirection::Outbound).await;
        let (not_live, _c3) = make_link(&registry, ConnectionDirection::Outbound).await;

        let mut good_rx = registry.register(&good).await.unwrap();
        let gone_rx = registry.register(&gone).await.unwrap();
        let _not_live_rx = registry.register(&not_live).await.unwrap();
        registry.mark_live(good.id()).await;
        registry.mark_live(gone.id()).await;
        drop(gone_rx);

        let responder = tokio::spawn(async move {
            if let Some(PeerCommand::Send { ack, .. }) = good_rx.recv().await {
                let _ = ack.send(Ok(()));
            }
        });

        let report = registry
            .broadcast(&ChainMessage::empty(), None, Duration::from_secs(1))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(report.delivered, vec![good.id()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, gone.id());
        assert!(matches!(report.failed[0].1, SendError::Closed));
    }

    #[tokio::test]
    async fn test_broadcast_times_out_silent_session() {
        let registry = PeerRegistry::new(8);
        let (link, _client) = make_link(&registry, ConnectionDirection::Outbound).await;
        let _rx = registry.register(&link).await.unwrap();
        registry.mark_live(link.id()).await;

        let report = registry
            .broadcast(&ChainMessage::empty(), None, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(report.delivered.is_empty());
        assert!(matches!(report.failed[0].1, SendError::Timeout));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_peer() {
        let registry = PeerRegistry::new(8);
        let (link, _client) = make_link(&registry, ConnectionDirection::Outbound).await;
        let _rx = registry.register(&link).await.unwrap();
        registry.mark_live(link.id()).await;

        let report = registry
            .broadcast(&ChainMessage::empty(), Some(link.id()), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(report.delivered.is_empty());
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = PeerRegistry::new(8);
        let (link, _client) = make_link(&registry, ConnectionDirection::Inbound).await;
        let mut rx = registry.register(&link).await.unwrap();

        assert_eq!(registry.close_all("shutdown").await, 1);
        assert!(matches!(
            rx.recv().await,
            Some(PeerCommand::Close { reason }) if reason == "shutdown"
        ));
    }
}
