//! Chain model and local ledger for meshledger nodes.
//!
//! This crate implements:
//! - Opaque JSON blocks and immutable chains
//! - Fork-choice rules (longest chain, heaviest chain)
//! - Pluggable chain validators
//! - The `Ledger` trait consumed by the sync layer, and an in-memory ledger
//!
//! # Example
//!
//! ```
//! use meshledger_ledger::{Chain, InMemoryLedger, Ledger, genesis_block};
//!
//! let ledger = InMemoryLedger::with_genesis();
//! let remote = Chain::from_genesis(genesis_block());
//! assert!(!ledger.compare_and_replace(remote).unwrap());
//! ```

mod block;
mod chain;
mod error;
mod fork_choice;
mod genesis;
mod ledger;
mod validation;

pub use block::Block;
pub use chain::Chain;
pub use error::{LedgerError, LedgerResult};
pub use fork_choice::{ForkChoice, HeaviestChain, LongestChain};
pub use genesis::{genesis_block, GENESIS_DATA, GENESIS_TIMESTAMP};
pub use ledger::{InMemoryLedger, Ledger, Replacement};
pub use validation::{AcceptAll, ChainValidator, SameGenesis};
