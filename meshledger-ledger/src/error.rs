//! Ledger error types.

use std::fmt;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// A block payload is not a JSON object.
    InvalidPayload { kind: &'static str },

    /// Candidate chain starts from a different genesis block than ours.
    GenesisMismatch,
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InvalidPayload { kind } => {
                write!(f, "invalid block payload: expected a JSON object, got {kind}")
            }
            LedgerError::GenesisMismatch => {
                write!(f, "candidate chain has a different genesis block")
            }
        }
    }
}

impl std::error::Error for LedgerError {}
