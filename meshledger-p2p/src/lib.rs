//! P2P chain synchronization for meshledger nodes.
//!
//! Every node holds a local ledger and keeps one persistent link to each
//! peer. When a link opens, both sides exchange their whole chain and each
//! keeps the better one by the ledger's fork-choice rule. Chains that win are
//! pushed on to the other peers, so the network converges transitively.
//!
//! # Architecture
//!
//! The node uses a task-per-peer architecture: each link is owned by one
//! session task, and the registry talks to sessions over channels.
//!
//! ```text
//! Main Task (SyncNode::run())
//! ├── Listener (accept inbound, hand to accept_peer)
//! ├── Peer Session 1 (exchange round, then live loop)
//! ├── Peer Session 2 (exchange round, then live loop)
//! └── Broadcast tasks (spawned after a replacement)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use meshledger_ledger::InMemoryLedger;
//! use meshledger_p2p::{P2pConfig, SyncNode};
//!
//! # async fn start() -> meshledger_p2p::P2pResult<()> {
//! let config = P2pConfig::new("0.0.0.0:6001".parse().unwrap())
//!     .with_peers(vec!["10.0.0.2:6001".parse().unwrap()]);
//! let node = SyncNode::new(config, Arc::new(InMemoryLedger::with_genesis()));
//! node.run().await
//! # }
//! ```

pub mod config;
pub mod error;

pub mod protocol;
pub mod peer;
pub mod registry;
pub mod sync;
pub mod node;

// Re-export main types
pub use config::{P2pConfig, MAX_MESSAGE_SIZE};
pub use error::{ConnectError, DecodeError, P2pError, P2pResult, ReceiveError, SendError};
pub use node::SyncNode;
pub use peer::{ConnectionDirection, PeerId, PeerInfo, PeerLink};
pub use protocol::ChainMessage;
pub use registry::{BroadcastReport, PeerRegistry};
pub use sync::{Reconciliation, RoundOutcome, RoundState, SyncService};
