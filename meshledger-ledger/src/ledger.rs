//! The ledger abstraction and its in-memory implementation.
//!
//! The ledger owns exactly one chain. Readers get an `Arc<Chain>` snapshot
//! that never changes under them; writers swap the whole chain. Every
//! evaluate-and-replace runs under the write lock, so two concurrent
//! candidates are decided one after the other against the chain the first
//! one left behind.

use std::sync::{Arc, PoisonError, RwLock};

use crate::block::Block;
use crate::chain::Chain;
use crate::error::LedgerResult;
use crate::fork_choice::{ForkChoice, LongestChain};
use crate::genesis::genesis_block;
use crate::validation::{AcceptAll, ChainValidator};

/// Local chain storage consumed by the synchronization layer.
///
/// Implementations must be safe to call from many tasks at once.
pub trait Ledger: Send + Sync {
    /// Get a consistent snapshot of the local chain.
    fn current_chain(&self) -> Arc<Chain>;

    /// Replace the local chain with `candidate` if it is strictly better and
    /// valid, reporting the lengths seen at the moment of the decision.
    ///
    /// A candidate that does not beat the local chain is kept out without
    /// being validated. A better candidate that fails validation returns the
    /// validation error and leaves the local chain untouched.
    fn try_replace(&self, candidate: Chain) -> LedgerResult<Replacement>;

    /// Like [`Ledger::try_replace`], returning only whether the chain was
    /// replaced.
    fn compare_and_replace(&self, candidate: Chain) -> LedgerResult<bool> {
        Ok(self.try_replace(candidate)?.replaced())
    }

    /// Append a block to the local chain and return the new chain.
    fn append(&self, block: Block) -> LedgerResult<Arc<Chain>>;

    /// Validate a chain against the local chain without replacing anything.
    fn validate(&self, candidate: &Chain) -> LedgerResult<()>;

    /// Number of blocks in the local chain.
    fn len(&self) -> usize {
        self.current_chain().len()
    }

    /// Check if the local chain is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What [`Ledger::try_replace`] did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// The candidate replaced a chain of `previous_len` blocks.
    Replaced { previous_len: usize, new_len: usize },
    /// The local chain of `local_len` blocks was kept.
    Kept { local_len: usize },
}

impl Replacement {
    /// Check if the local chain was replaced.
    pub fn replaced(&self) -> bool {
        matches!(self, Replacement::Replaced { .. })
    }
}

/// A ledger held entirely in memory.
pub struct InMemoryLedger {
    chain: RwLock<Arc<Chain>>,
    fork_choice: Box<dyn ForkChoice>,
    validator: Box<dyn ChainValidator>,
}

impl InMemoryLedger {
    /// Create a ledger with an empty chain.
    pub fn new() -> Self {
        Self::from_chain(Chain::default())
    }

    /// Create a ledger holding only the genesis block.
    pub fn with_genesis() -> Self {
        Self::from_chain(Chain::from_genesis(genesis_block()))
    }

    /// Create a ledger holding the given chain.
    pub fn from_chain(chain: Chain) -> Self {
        Self {
            chain: RwLock::new(Arc::new(chain)),
            fork_choice: Box::new(LongestChain),
            validator: Box::new(AcceptAll),
        }
    }

    /// Use a different fork-choice rule.
    pub fn with_fork_choice(mut self, fork_choice: impl ForkChoice + 'static) -> Self {
        self.fork_choice = Box::new(fork_choice);
        self
    }

    /// Use a different chain validator.
    pub fn with_validator(mut self, validator: impl ChainValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Name of the active fork-choice rule.
    pub fn fork_choice_name(&self) -> &'static str {
        self.fork_choice.name()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn current_chain(&self) -> Arc<Chain> {
        let guard = self.chain.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn try_replace(&self, candidate: Chain) -> LedgerResult<Replacement> {
        let mut guard = self.chain.write().unwrap_or_else(PoisonError::into_inner);

        if !self.fork_choice.prefers(&candidate, &guard) {
            tracing::trace!(
                rule = self.fork_choice.name(),
                local_len = guard.len(),
                remote_len = candidate.len(),
                "Candidate chain does not beat local chain"
            );
            return Ok(Replacement::Kept {
                local_len: guard.len(),
            });
        }

        self.validator.validate(&candidate, &guard)?;

        let previous_len = guard.len();
        let new_len = candidate.len();
        *guard = Arc::new(candidate);

        tracing::debug!(
            rule = self.fork_choice.name(),
            previous_len,
            new_len,
            "Replaced local chain"
        );
        Ok(Replacement::Replaced {
            previous_len,
            new_len,
        })
    }

    fn append(&self, block: Block) -> LedgerResult<Arc<Chain>> {
        let mut guard = self.chain.write().unwrap_or_else(PoisonError::into_inner);

        let extended = guard.with_block(block);
        self.validator.validate(&extended, &guard)?;

        let extended = Arc::new(extended);
        *guard = Arc::clone(&extended);

        tracing::debug!(len = extended.len(), "Appended block");
        Ok(extended)
    }

    fn validate(&self, candidate: &Chain) -> LedgerResult<()> {
        let local = self.current_chain();
        self.validator.validate(candidate, &local)
    }
}
