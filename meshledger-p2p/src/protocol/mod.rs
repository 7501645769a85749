//! Wire protocol.
//!
//! This module contains:
//! - Length-prefixed framing codec
//! - The chain exchange message

pub mod framing;
pub mod messages;

pub use framing::{FrameCodec, FrameError};
pub use messages::ChainMessage;
