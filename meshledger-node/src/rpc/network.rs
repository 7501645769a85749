//! Network-related RPC methods.

use std::sync::Arc;

use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};

use meshledger_p2p::{BroadcastReport, PeerInfo};

use super::{RpcState, INTERNAL_ERROR};

/// Peer information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub addr: String,
    pub direction: String,
    pub live: bool,
    pub connected_secs: u64,
    pub last_remote_len: Option<usize>,
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    pub replacements: u64,
}

impl From<&PeerInfo> for PeerSummary {
    fn from(info: &PeerInfo) -> Self {
        Self {
            id: info.id.to_string(),
            addr: info.addr.to_string(),
            direction: info.direction.to_string(),
            live: info.live,
            connected_secs: info.connection_duration().as_secs(),
            last_remote_len: info.last_remote_len,
            rounds_completed: info.rounds_completed,
            rounds_failed: info.rounds_failed,
            replacements: info.replacements,
        }
    }
}

/// A peer the chain could not be pushed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub peer: String,
    pub error: String,
}

/// Result of `syncChains`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub chain_length: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<FailedDelivery>,
}

impl SyncReport {
    fn new(chain_length: usize, report: &BroadcastReport) -> Self {
        Self {
            chain_length,
            delivered: report.delivered.iter().map(ToString::to_string).collect(),
            failed: report
                .failed
                .iter()
                .map(|(peer, e)| FailedDelivery {
                    peer: peer.to_string(),
                    error: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Node information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: String,
    pub p2p_addr: String,
    pub chain_length: usize,
    pub connections: usize,
    pub live_peers: usize,
    pub configured_peers: usize,
    pub uptime_secs: u64,
}

/// Register network RPC methods.
pub fn register_methods(module: &mut RpcModule<Arc<RpcState>>) -> anyhow::Result<()> {
    // getPeerInfo - list connected peers
    module.register_async_method("getPeerInfo", |_params, state, _| async move {
        let peers: Vec<PeerSummary> = state
            .service
            .registry()
            .peers()
            .await
            .iter()
            .map(PeerSummary::from)
            .collect();

        Ok::<_, ErrorObjectOwned>(peers)
    })?;

    // getConnectionCount - get number of connections
    module.register_async_method("getConnectionCount", |_params, state, _| async move {
        Ok::<_, ErrorObjectOwned>(state.service.registry().len().await)
    })?;

    // syncChains - push the local chain to every live peer now
    module.register_async_method("syncChains", |_params, state, _| async move {
        let chain_length = state.ledger().len();
        let report = state.service.broadcast_chain(None).await.map_err(|e| {
            ErrorObjectOwned::owned(INTERNAL_ERROR, format!("Broadcast failed: {e}"), None::<()>)
        })?;

        tracing::info!(
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Chain pushed on request"
        );
        Ok::<_, ErrorObjectOwned>(SyncReport::new(chain_length, &report))
    })?;

    // getNodeInfo - get node information
    module.register_async_method("getNodeInfo", |_params, state, _| async move {
        let peers = state.service.registry().peers().await;

        Ok::<_, ErrorObjectOwned>(NodeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            p2p_addr: state.p2p_addr.to_string(),
            chain_length: state.ledger().len(),
            connections: peers.len(),
            live_peers: peers.iter().filter(|p| p.live).count(),
            configured_peers: state.service.config().peers.len(),
            uptime_secs: state.started_at.elapsed().as_secs(),
        })
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshledger_p2p::{ConnectionDirection, PeerId, SendError};

    #[test]
    fn test_peer_summary() {
        let mut info = PeerInfo::new(
            PeerId::new(3),
            "10.0.0.2:6001".parse().unwrap(),
            ConnectionDirection::Outbound,
        );
        info.record_reconciled(4, true);

        let summary = PeerSummary::from(&info);
        assert_eq!(summary.id, "peer-3");
        assert_eq!(summary.direction, "outbound");
        assert_eq!(summary.last_remote_len, Some(4));
        assert_eq!(summary.replacements, 1);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["lastRemoteLen"], 4);
    }

    #[test]
    fn test_sync_report() {
        let report = BroadcastReport {
            delivered: vec![PeerId::new(1)],
            failed: vec![(PeerId::new(2), SendError::Timeout)],
        };

        let sync = SyncReport::new(7, &report);
        assert_eq!(sync.chain_length, 7);
        assert_eq!(sync.delivered, vec!["peer-1".to_string()]);
        assert_eq!(sync.failed.len(), 1);
        assert_eq!(sync.failed[0].peer, "peer-2");
    }
}
