//! Chain validation.
//!
//! Mining and block validation live outside the ledger. A validator is the
//! hook through which the owner of the ledger rejects a candidate chain
//! before it can replace the local one.

use crate::chain::Chain;
use crate::error::{LedgerError, LedgerResult};

/// Checks a candidate chain before it may replace the local chain.
pub trait ChainValidator: Send + Sync {
    /// Validate `candidate` against the current `local` chain.
    fn validate(&self, candidate: &Chain, local: &Chain) -> LedgerResult<()>;
}

/// Accepts every chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ChainValidator for AcceptAll {
    fn validate(&self, _candidate: &Chain, _local: &Chain) -> LedgerResult<()> {
        Ok(())
    }
}

/// Requires a candidate to share our genesis block.
///
/// An empty local chain has no genesis yet and accepts any candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameGenesis;

impl ChainValidator for SameGenesis {
    fn validate(&self, candidate: &Chain, local: &Chain) -> LedgerResult<()> {
        match (local.genesis(), candidate.genesis()) {
            (None, _) => Ok(()),
            (Some(ours), Some(theirs)) if ours == theirs => Ok(()),
            _ => Err(LedgerError::GenesisMismatch),
        }
    }
}
