//! Per-peer session task.
//!
//! Each link is owned by exactly one session task for its whole life:
//! register, run the exchange round, then stay live serving broadcasts and
//! reconciling chains the peer pushes, until the link closes. The session
//! always unregisters on the way out.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use meshledger_ledger::Chain;

use crate::error::{P2pError, P2pResult, ReceiveError, SendError};
use crate::peer::PeerLink;
use crate::protocol::ChainMessage;
use crate::registry::PeerCommand;
use crate::sync::{RoundOutcome, SyncService};

/// Drive one peer link until it closes.
pub async fn run_session(service: SyncService, mut link: PeerLink) {
    let peer = link.id();
    let registry = service.registry().clone();

    let mut commands = match registry.register(&link).await {
        Ok(commands) => commands,
        Err(e) => {
            tracing::info!(peer = %peer, addr = %link.addr(), error = %e, "Rejected peer");
            link.close("rejected").await;
            return;
        }
    };

    let offered = service.ledger().current_chain();
    let outcome = service.exchange_round_from(&mut link, Arc::clone(&offered)).await;
    service.finish_round(peer, &outcome).await;

    if !outcome.is_reconciled() {
        registry.unregister(peer).await;
        return;
    }

    registry.mark_live(peer).await;
    tracing::debug!(peer = %peer, addr = %link.addr(), "Peer is live");

    let reason = match catch_up(&service, &mut link, &offered, &outcome).await {
        Ok(()) => live_loop(&service, &mut link, &mut commands).await,
        Err(e) => format!("catch-up failed: {e}"),
    };

    link.close(&reason).await;
    registry.unregister(peer).await;
    tracing::info!(peer = %peer, addr = %link.addr(), reason = %reason, "Peer session ended");
}

/// Push the local chain if it changed while the round was running.
async fn catch_up(
    service: &SyncService,
    link: &mut PeerLink,
    offered: &Arc<Chain>,
    outcome: &RoundOutcome,
) -> P2pResult<()> {
    let Some(current) = service.missed_update(offered, outcome) else {
        return Ok(());
    };

    tracing::debug!(
        peer = %link.id(),
        offered_len = offered.len(),
        current_len = current.len(),
        "Local chain changed during round, pushing update"
    );
    let body = ChainMessage::from_local(&current).encode()?;
    let deadline = Instant::now() + service.config().broadcast_timeout;
    let early = link.send_draining(body, deadline).await?;
    handle_push(service, link, early).await;
    Ok(())
}

/// Reconcile a chain the peer pushed while we were sending.
async fn handle_push(service: &SyncService, link: &PeerLink, payload: Option<Bytes>) {
    if let Some(payload) = payload {
        let outcome = service.handle_pushed_chain(link.id(), &payload);
        service.finish_round(link.id(), &outcome).await;
    }
}

async fn live_loop(
    service: &SyncService,
    link: &mut PeerLink,
    commands: &mut mpsc::UnboundedReceiver<PeerCommand>,
) -> String {
    let peer = link.id();
    let scope = link.scope().clone();

    loop {
        tokio::select! {
            _ = scope.cancelled() => {
                return "shutdown".to_string();
            }

            command = commands.recv() => match command {
                Some(PeerCommand::Send { body, deadline, ack }) => {
                    match link.send_draining(body, deadline).await {
                        Ok(early) => {
                            let _ = ack.send(Ok(()));
                            handle_push(service, link, early).await;
                        }
                        Err(P2pError::Send(e)) => {
                            let reason = format!("send failed: {e}");
                            let _ = ack.send(Err(e));
                            return reason;
                        }
                        Err(e) => {
                            let _ = ack.send(Err(SendError::Closed));
                            return format!("receive failed: {e}");
                        }
                    }
                }
                Some(PeerCommand::Close { reason }) => return reason,
                None => return "registry dropped".to_string(),
            },

            received = link.next_message() => match received {
                Ok(payload) => {
                    let outcome = service.handle_pushed_chain(peer, &payload);
                    service.finish_round(peer, &outcome).await;
                }
                Err(ReceiveError::Closed) => return "peer closed connection".to_string(),
                Err(ReceiveError::Cancelled) => return "shutdown".to_string(),
                Err(e) => return format!("receive failed: {e}"),
            },
        }
    }
}
