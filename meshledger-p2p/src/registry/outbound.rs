//! Outbound connection management.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::ConnectError;
use crate::peer::PeerLink;
use crate::registry::PeerRegistry;

/// Result of one outbound connection attempt.
pub type ConnectOutcome = (SocketAddr, Result<PeerLink, ConnectError>);

impl PeerRegistry {
    /// Dial every address concurrently.
    ///
    /// Returns one entry per address, in the order given. One failure does
    /// not abort the others, and nothing is retried. Addresses that already
    /// have a link, or appear twice, report `AlreadyConnected`. The returned
    /// links are not registered yet.
    pub async fn connect_all(&self, addresses: &[SocketAddr], timeout: Duration) -> Vec<ConnectOutcome> {
        let mut results: Vec<Option<ConnectOutcome>> = Vec::with_capacity(addresses.len());
        let mut dialing = HashSet::new();
        let mut attempts = JoinSet::new();

        for (index, addr) in addresses.iter().copied().enumerate() {
            if !dialing.insert(addr) || self.is_connected(&addr).await {
                results.push(Some((addr, Err(ConnectError::AlreadyConnected { addr }))));
                continue;
            }

            results.push(None);
            let id = self.next_peer_id();
            attempts.spawn(async move { (index, addr, PeerLink::connect(id, addr, timeout).await) });
        }

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((index, addr, result)) => {
                    if let Err(e) = &result {
                        tracing::debug!(addr = %addr, error = %e, "Outbound connection failed");
                    }
                    results[index] = Some((addr, result));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Connect task failed");
                }
            }
        }

        results
            .into_iter()
            .zip(addresses)
            .map(|(result, addr)| {
                result.unwrap_or_else(|| {
                    let source = std::io::Error::other("connect task aborted");
                    (*addr, Err(ConnectError::Unreachable { addr: *addr, source }))
                })
            })
            .collect()
    }
}
