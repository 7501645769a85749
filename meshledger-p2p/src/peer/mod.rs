//! Peer connections.
//!
//! This module provides:
//! - Peer identification and metadata
//! - The per-peer message link

pub mod info;
pub mod link;

pub use info::{ConnectionDirection, PeerId, PeerInfo};
pub use link::PeerLink;
