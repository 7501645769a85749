//! Exchange round state tracking.

use std::fmt;

use crate::error::P2pError;
use crate::peer::PeerId;

/// State of one exchange round on one link.
///
/// Rounds move strictly forward:
/// `Connected → SentLocalChain → AwaitingRemoteChain → Reconciled | Failed`.
/// Any non-terminal state may also fall to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundState {
    /// Link is open, nothing sent yet.
    #[default]
    Connected,
    /// Our chain has been written to the link.
    SentLocalChain,
    /// Waiting for the peer's chain.
    AwaitingRemoteChain,
    /// The peer's chain was handed to the ledger.
    Reconciled,
    /// The round ended with an error.
    Failed,
}

impl RoundState {
    /// Check if the round is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::Reconciled | RoundState::Failed)
    }

    /// Check if moving to `next` is allowed.
    pub fn can_transition_to(&self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (Connected, SentLocalChain)
                | (SentLocalChain, AwaitingRemoteChain)
                | (AwaitingRemoteChain, Reconciled)
                | (Connected | SentLocalChain | AwaitingRemoteChain, Failed)
        )
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Connected => write!(f, "connected"),
            RoundState::SentLocalChain => write!(f, "sent_local_chain"),
            RoundState::AwaitingRemoteChain => write!(f, "awaiting_remote_chain"),
            RoundState::Reconciled => write!(f, "reconciled"),
            RoundState::Failed => write!(f, "failed"),
        }
    }
}

/// Tracks the state of a round with one peer.
#[derive(Debug)]
pub struct RoundTracker {
    peer: PeerId,
    state: RoundState,
}

impl RoundTracker {
    /// Start tracking a round with `peer`.
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: RoundState::Connected,
        }
    }

    /// Current state.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Transition to a new state. Backward or out-of-order moves are
    /// refused and return `false`.
    pub fn transition_to(&mut self, new_state: RoundState) -> bool {
        if !self.state.can_transition_to(new_state) {
            tracing::warn!(
                peer = %self.peer,
                from = %self.state,
                to = %new_state,
                "Refused round state transition"
            );
            return false;
        }

        tracing::debug!(
            peer = %self.peer,
            from = %self.state,
            to = %new_state,
            "Round state transition"
        );
        self.state = new_state;
        true
    }
}

/// What the ledger did with a peer's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The peer's chain replaced ours.
    Replaced { previous_len: usize, new_len: usize },
    /// Our chain was kept.
    Kept { local_len: usize, remote_len: usize },
    /// The peer sent no chain.
    PeerHadNoChain,
}

impl Reconciliation {
    /// Check if the local chain changed.
    pub fn replaced(&self) -> bool {
        matches!(self, Reconciliation::Replaced { .. })
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconciliation::Replaced {
                previous_len,
                new_len,
            } => write!(f, "replaced ({previous_len} -> {new_len})"),
            Reconciliation::Kept {
                local_len,
                remote_len,
            } => write!(f, "kept (local {local_len}, remote {remote_len})"),
            Reconciliation::PeerHadNoChain => write!(f, "peer had no chain"),
        }
    }
}

/// Outcome of one exchange round.
#[derive(Debug)]
pub enum RoundOutcome {
    /// The round reached the ledger.
    Reconciled(Reconciliation),
    /// The round failed. The error is local to this peer.
    Failed(P2pError),
}

impl RoundOutcome {
    /// Check if the round succeeded.
    pub fn is_reconciled(&self) -> bool {
        matches!(self, RoundOutcome::Reconciled(_))
    }

    /// Check if the round replaced the local chain.
    pub fn replaced(&self) -> bool {
        matches!(self, RoundOutcome::Reconciled(r) if r.replaced())
    }
}
