//! Chain exchange message.
//!
//! The protocol has a single message: the sender's whole chain as a JSON
//! array of blocks, or `null` when the sender has no chain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use meshledger_ledger::Chain;

use crate::error::{DecodeError, SendError};

/// A chain offered by a peer, or no chain at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainMessage(Option<Chain>);

impl ChainMessage {
    /// Message carrying `chain`.
    pub fn new(chain: Chain) -> Self {
        Self(Some(chain))
    }

    /// Message carrying no chain.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Message offering the local chain. An empty chain is sent as `null`.
    pub fn from_local(chain: &Chain) -> Self {
        if chain.is_empty() {
            Self::empty()
        } else {
            Self::new(chain.clone())
        }
    }

    /// Borrow the carried chain, if any.
    pub fn chain(&self) -> Option<&Chain> {
        self.0.as_ref()
    }

    /// Take the carried chain. An empty array counts as no chain.
    pub fn into_chain(self) -> Option<Chain> {
        self.0.filter(|chain| !chain.is_empty())
    }

    /// Serialize to the wire text form.
    pub fn encode(&self) -> Result<Bytes, SendError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse the wire text form.
    ///
    /// Anything that is not `null` or an array of JSON objects is rejected
    /// here, before it can reach the ledger.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Chain> for ChainMessage {
    fn from(chain: Chain) -> Self {
        Self::new(chain)
    }
}
