//! Chain synchronization.
//!
//! One exchange round per link:
//! 1. Send a snapshot of the local chain (`null` when empty)
//! 2. Wait, bounded by the round deadline, for the peer's chain
//! 3. Decode it, rejecting malformed payloads before the ledger sees them
//! 4. Let the ledger keep or replace its chain under its own lock
//!
//! A replacement can then be pushed to every other peer so the better chain
//! spreads through the network.

pub mod session;
pub mod state;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use meshledger_ledger::{Chain, Ledger, LedgerResult, Replacement};

use crate::config::P2pConfig;
use crate::error::{P2pError, P2pResult};
use crate::peer::{PeerId, PeerLink};
use crate::protocol::ChainMessage;
use crate::registry::{BroadcastReport, PeerRegistry};

pub use state::{Reconciliation, RoundOutcome, RoundState, RoundTracker};

/// Runs exchange rounds and broadcasts against one ledger. Cheap to clone.
#[derive(Clone)]
pub struct SyncService {
    ledger: Arc<dyn Ledger>,
    registry: PeerRegistry,
    config: Arc<P2pConfig>,
    tasks: TaskTracker,
}

impl SyncService {
    /// Create a sync service.
    pub fn new(ledger: Arc<dyn Ledger>, registry: PeerRegistry, config: Arc<P2pConfig>) -> Self {
        Self {
            ledger,
            registry,
            config,
            tasks: TaskTracker::new(),
        }
    }

    /// The local ledger.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// The peer registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    /// Tracker for session and broadcast tasks.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Run one exchange round on `link`.
    ///
    /// Send and receive share one deadline of `round_timeout`. Any failure
    /// closes the link and leaves the ledger untouched.
    pub async fn exchange_round(&self, link: &mut PeerLink) -> RoundOutcome {
        self.exchange_round_from(link, self.ledger.current_chain()).await
    }

    /// Run one exchange round offering `local` as our chain.
    pub(crate) async fn exchange_round_from(&self, link: &mut PeerLink, local: Arc<Chain>) -> RoundOutcome {
        let peer = link.id();
        let mut round = RoundTracker::new(peer);
        let deadline = Instant::now() + self.config.round_timeout;

        match self.run_round(link, &mut round, &local, deadline).await {
            Ok(reconciliation) => {
                round.transition_to(RoundState::Reconciled);
                tracing::info!(
                    peer = %peer,
                    addr = %link.addr(),
                    result = %reconciliation,
                    "Exchange round reconciled"
                );
                RoundOutcome::Reconciled(reconciliation)
            }
            Err(e) => {
                round.transition_to(RoundState::Failed);
                tracing::warn!(
                    peer = %peer,
                    addr = %link.addr(),
                    error = %e,
                    "Exchange round failed"
                );
                link.close("exchange round failed").await;
                RoundOutcome::Failed(e)
            }
        }
    }

    async fn run_round(
        &self,
        link: &mut PeerLink,
        round: &mut RoundTracker,
        local: &Chain,
        deadline: Instant,
    ) -> P2pResult<Reconciliation> {
        let body = ChainMessage::from_local(local).encode()?;

        // The peer is sending its chain at the same time; keep reading.
        let early = link.send_draining(body, deadline).await?;
        round.transition_to(RoundState::SentLocalChain);

        round.transition_to(RoundState::AwaitingRemoteChain);
        let payload = match early {
            Some(payload) => payload,
            None => link.receive_by(deadline).await?,
        };

        let message = ChainMessage::decode(&payload)?;
        Ok(self.reconcile(link.id(), message)?)
    }

    /// Hand a peer's chain to the ledger.
    pub fn reconcile(&self, from: PeerId, message: ChainMessage) -> LedgerResult<Reconciliation> {
        let Some(remote) = message.into_chain() else {
            tracing::debug!(peer = %from, "Peer had no chain");
            return Ok(Reconciliation::PeerHadNoChain);
        };

        let remote_len = remote.len();

        match self.ledger.try_replace(remote)? {
            Replacement::Replaced {
                previous_len,
                new_len,
            } => {
                tracing::info!(
                    peer = %from,
                    previous_len,
                    new_len,
                    "Replaced local chain with peer's chain"
                );
                Ok(Reconciliation::Replaced {
                    previous_len,
                    new_len,
                })
            }
            Replacement::Kept { local_len } => Ok(Reconciliation::Kept {
                local_len,
                remote_len,
            }),
        }
    }

    /// Decode and reconcile a chain a live peer pushed to us.
    pub fn handle_pushed_chain(&self, from: PeerId, payload: &[u8]) -> RoundOutcome {
        let result = ChainMessage::decode(payload)
            .map_err(P2pError::from)
            .and_then(|message| self.reconcile(from, message).map_err(P2pError::from));

        match result {
            Ok(reconciliation) => {
                tracing::debug!(peer = %from, result = %reconciliation, "Reconciled pushed chain");
                RoundOutcome::Reconciled(reconciliation)
            }
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "Ignoring chain pushed by peer");
                RoundOutcome::Failed(e)
            }
        }
    }

    /// Send the local chain to every live peer except `exclude`.
    pub async fn broadcast_chain(&self, exclude: Option<PeerId>) -> P2pResult<BroadcastReport> {
        let chain = self.ledger.current_chain();
        let message = ChainMessage::from_local(&chain);
        let report = self
            .registry
            .broadcast(&message, exclude, self.config.broadcast_timeout)
            .await?;

        tracing::info!(
            chain_len = chain.len(),
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Broadcast local chain"
        );
        Ok(report)
    }

    /// Broadcast from a separate task.
    ///
    /// Session tasks use this so that a session never waits on the
    /// acknowledgement of a broadcast it would itself have to serve.
    pub fn spawn_broadcast(&self, exclude: Option<PeerId>) -> JoinHandle<()> {
        let service = self.clone();
        self.tasks.spawn(async move {
            if let Err(e) = service.broadcast_chain(exclude).await {
                tracing::warn!(error = %e, "Broadcast failed");
            }
        })
    }

    /// Return the local chain if it changed after `offered` was sent in a
    /// round and the peer has not seen the change.
    ///
    /// A peer only becomes a broadcast target once its round is over, so a
    /// replacement that lands in between would otherwise never reach it.
    pub(crate) fn missed_update(&self, offered: &Arc<Chain>, outcome: &RoundOutcome) -> Option<Arc<Chain>> {
        let current = self.ledger.current_chain();
        if Arc::ptr_eq(&current, offered) || *current == **offered {
            return None;
        }
        if let RoundOutcome::Reconciled(Reconciliation::Replaced { new_len, .. }) = outcome {
            if current.len() == *new_len {
                return None;
            }
        }
        Some(current)
    }

    /// Record a finished round and spread a replaced chain.
    pub(crate) async fn finish_round(&self, peer: PeerId, outcome: &RoundOutcome) {
        self.registry.record_round(peer, outcome).await;

        if outcome.replaced() && self.config.rebroadcast {
            self.spawn_broadcast(Some(peer));
        }
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("chain_len", &self.ledger.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReceiveError;
    use crate::peer::ConnectionDirection;
    use meshledger_ledger::{genesis_block, Block, InMemoryLedger, SameGenesis};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    fn chain_of(extra: usize) -> Chain {
        let mut chain = Chain::from_genesis(genesis_block());
        for i in 0..extra {
            chain = chain.with_block(Block::new(json!({ "index": i + 1 })).unwrap());
        }
        chain
    }

    fn service_with(chain: Chain, round_timeout: Duration) -> SyncService {
        let config = P2pConfig::default().with_round_timeout(round_timeout);
        let ledger = InMemoryLedger::from_chain(chain).with_validator(SameGenesis);
        SyncService::new(Arc::new(ledger), PeerRegistry::new(8), Arc::new(config))
    }

    /// A link on our side and the raw framed stream on the peer's side.
    async fn link_to_raw_peer() -> (PeerLink, PeerLink) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, remote) = accepted.unwrap();

        let ours = PeerLink::from_stream(PeerId::new(1), remote, ConnectionDirection::Inbound, server);
        let theirs = PeerLink::from_stream(PeerId::new(2), addr, ConnectionDirection::Outbound, client.unwrap());
        (ours, theirs)
    }

    #[test]
    fn test_reconcile_longer_remote() {
        let service = service_with(chain_of(0), Duration::from_secs(1));
        let remote = chain_of(2);

        let result = service.reconcile(PeerId::new(1), ChainMessage::new(remote.clone())).unwrap();

        assert_eq!(result, Reconciliation::Replaced { previous_len: 1, new_len: 3 });
        assert_eq!(*service.ledger().current_chain(), remote);
    }

    #[test]
    fn test_reconcile_shorter_remote() {
        let service = service_with(chain_of(2), Duration::from_secs(1));

        let result = service.reconcile(PeerId::new(1), ChainMessage::new(chain_of(0))).unwrap();

        assert_eq!(result, Reconciliation::Kept { local_len: 3, remote_len: 1 });
        assert_eq!(service.ledger().len(), 3);
    }

    #[test]
    fn test_reconcile_twice_is_noop() {
        let service = service_with(chain_of(0), Duration::from_secs(1));
        let remote = ChainMessage::new(chain_of(3));

        assert!(service.reconcile(PeerId::new(1), remote.clone()).unwrap().replaced());
        assert!(!service.reconcile(PeerId::new(1), remote).unwrap().replaced());
        assert_eq!(service.ledger().len(), 4);
    }

    #[test]
    fn test_reconcile_null_chain() {
        let service = service_with(chain_of(1), Duration::from_secs(1));

        let result = service.reconcile(PeerId::new(1), ChainMessage::empty()).unwrap();

        assert_eq!(result, Reconciliation::PeerHadNoChain);
        assert_eq!(service.ledger().len(), 2);
    }

    #[test]
    fn test_pushed_malformed_chain_is_isolated() {
        let service = service_with(chain_of(1), Duration::from_secs(1));
        let before = service.ledger().current_chain();

        let outcome = service.handle_pushed_chain(PeerId::new(1), b"[{\"index\": 1}, 7]");
        assert!(matches!(outcome, RoundOutcome::Failed(P2pError::Decode(_))));

        let outcome = service.handle_pushed_chain(PeerId::new(2), &ChainMessage::new(chain_of(2)).encode().unwrap());
        assert!(outcome.replaced());
        assert_eq!(before.len(), 2);
        assert_eq!(service.ledger().len(), 3);
    }

    #[tokio::test]
    async fn test_exchange_round_replaces_shorter_local() {
        let service = service_with(chain_of(0), Duration::from_secs(2));
        let (mut ours, mut theirs) = link_to_raw_peer().await;
        let remote = chain_of(2);

        let peer = tokio::spawn(async move {
            let body = theirs.receive(Duration::from_secs(2)).await.unwrap();
            theirs.send(&ChainMessage::new(remote), Duration::from_secs(2)).await.unwrap();
            body
        });

        let outcome = service.exchange_round(&mut ours).await;
        let sent = peer.await.unwrap();

        assert!(outcome.replaced());
        assert_eq!(ChainMessage::decode(&sent).unwrap().into_chain(), Some(chain_of(0)));
        assert_eq!(service.ledger().len(), 3);
        assert!(!ours.is_closed());
    }

    #[tokio::test]
    async fn test_exchange_round_empty_local_sends_null() {
        let config = Arc::new(P2pConfig::default());
        let service = SyncService::new(Arc::new(InMemoryLedger::new()), PeerRegistry::new(8), config);
        let (mut ours, mut theirs) = link_to_raw_peer().await;

        let peer = tokio::spawn(async move {
            let body = theirs.receive(Duration::from_secs(2)).await.unwrap();
            theirs.send(&ChainMessage::empty(), Duration::from_secs(2)).await.unwrap();
            body
        });

        let outcome = service.exchange_round(&mut ours).await;
        assert_eq!(&peer.await.unwrap()[..], b"null");
        assert!(matches!(
            outcome,
            RoundOutcome::Reconciled(Reconciliation::PeerHadNoChain)
        ));
    }

    #[tokio::test]
    async fn test_exchange_round_silent_peer_times_out() {
        let timeout = Duration::from_millis(200);
        let service = service_with(chain_of(1), timeout);
        let (mut ours, _theirs) = link_to_raw_peer().await;

        let started = std::time::Instant::now();
        let outcome = service.exchange_round(&mut ours).await;
        let elapsed = started.elapsed();

        assert!(matches!(
            outcome,
            RoundOutcome::Failed(P2pError::Receive(ReceiveError::Timeout))
        ));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
        assert!(ours.is_closed());
        assert_eq!(service.ledger().len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_round_malformed_payload() {
        let service = service_with(chain_of(1), Duration::from_secs(2));
        let (mut ours, mut theirs) = link_to_raw_peer().await;

        let peer = tokio::spawn(async move {
            theirs.receive(Duration::from_secs(2)).await.unwrap();
            let deadline = Instant::now() + Duration::from_secs(2);
            theirs
                .send_encoded(bytes::Bytes::from_static(b"{not json"), deadline)
                .await
                .unwrap();
        });

        let outcome = service.exchange_round(&mut ours).await;
        peer.await.unwrap();

        assert!(matches!(outcome, RoundOutcome::Failed(P2pError::Decode(_))));
        assert!(ours.is_closed());
        assert_eq!(service.ledger().len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_round_peer_closes() {
        let service = service_with(chain_of(1), Duration::from_secs(2));
        let (mut ours, mut theirs) = link_to_raw_peer().await;

        let peer = tokio::spawn(async move {
            theirs.receive(Duration::from_secs(2)).await.unwrap();
            theirs.close("bye").await;
        });

        let outcome = service.exchange_round(&mut ours).await;
        peer.await.unwrap();

        assert!(matches!(
            outcome,
            RoundOutcome::Failed(P2pError::Receive(ReceiveError::Closed))
        ));
    }

    /// A chain of `extra` blocks, each carrying about 64KB of padding.
    fn padded_chain(extra: usize, branch: &str) -> Chain {
        let pad = "x".repeat(64 * 1024);
        let mut chain = Chain::from_genesis(genesis_block());
        for i in 0..extra {
            let data = json!({ "index": i + 1, "branch": branch, "pad": pad });
            chain = chain.with_block(Block::new(data).unwrap());
        }
        chain
    }

    #[tokio::test]
    async fn test_exchange_round_large_chains_both_sides() {
        let longer = padded_chain(110, "a");
        let shorter = padded_chain(90, "b");
        let service_a = service_with(longer.clone(), Duration::from_secs(20));
        let service_b = service_with(shorter, Duration::from_secs(20));
        let (mut link_a, mut link_b) = link_to_raw_peer().await;

        let (outcome_a, outcome_b) = tokio::join!(
            service_a.exchange_round(&mut link_a),
            service_b.exchange_round(&mut link_b),
        );

        assert!(outcome_a.is_reconciled(), "{outcome_a:?}");
        assert!(outcome_b.replaced(), "{outcome_b:?}");
        assert_eq!(*service_a.ledger().current_chain(), longer);
        assert_eq!(*service_b.ledger().current_chain(), longer);
        assert!(!link_a.is_closed());
        assert!(!link_b.is_closed());
    }
}
