//! Fork-choice rules.
//!
//! A rule answers one question: should a candidate chain replace the local
//! one? Every rule here is strict, so a candidate of equal quality never wins
//! and nodes holding equally good chains do not flap between them.

use crate::block::Block;
use crate::chain::Chain;

/// Decides whether a candidate chain is better than the local chain.
pub trait ForkChoice: Send + Sync {
    /// Return `true` only if `candidate` is strictly better than `local`.
    fn prefers(&self, candidate: &Chain, local: &Chain) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Longest chain wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestChain;

impl ForkChoice for LongestChain {
    fn prefers(&self, candidate: &Chain, local: &Chain) -> bool {
        candidate.len() > local.len()
    }

    fn name(&self) -> &'static str {
        "longest-chain"
    }
}

/// Chain with the most cumulative work wins.
///
/// Blocks are opaque to the ledger, so the owner supplies the per-block work
/// function (for example a difficulty field it knows how to read).
pub struct HeaviestChain<W> {
    work: W,
}

impl<W> HeaviestChain<W>
where
    W: Fn(&Block) -> u128 + Send + Sync,
{
    /// Create a rule using the given per-block work function.
    pub fn new(work: W) -> Self {
        Self { work }
    }

    /// Total work of a chain under this rule.
    pub fn chain_work(&self, chain: &Chain) -> u128 {
        chain.work_with(&self.work)
    }
}

impl<W> ForkChoice for HeaviestChain<W>
where
    W: Fn(&Block) -> u128 + Send + Sync,
{
    fn prefers(&self, candidate: &Chain, local: &Chain) -> bool {
        self.chain_work(candidate) > self.chain_work(local)
    }

    fn name(&self) -> &'static str {
        "heaviest-chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain_of(difficulties: &[u64]) -> Chain {
        Chain::new(
            difficulties
                .iter()
                .map(|d| Block::new(json!({ "difficulty": d })).unwrap())
                .collect(),
        )
    }

    fn difficulty(block: &Block) -> u128 {
        block
            .field("difficulty")
            .and_then(|d| d.as_u64())
            .unwrap_or(0) as u128
    }

    #[test]
    fn test_longest_chain_is_strict() {
        let rule = LongestChain;
        let short = chain_of(&[1]);
        let long = chain_of(&[1, 1, 1]);
        let other_long = chain_of(&[5, 5, 5]);

        assert!(rule.prefers(&long, &short));
        assert!(!rule.prefers(&short, &long));
        assert!(!rule.prefers(&other_long, &long));
        assert!(!rule.prefers(&long, &long));
    }

    #[test]
    fn test_heaviest_chain() {
        let rule = HeaviestChain::new(difficulty);
        let long_light = chain_of(&[1, 1, 1, 1]);
        let short_heavy = chain_of(&[1, 8]);

        assert_eq!(rule.chain_work(&long_light), 4);
        assert_eq!(rule.chain_work(&short_heavy), 9);
        assert!(rule.prefers(&short_heavy, &long_light));
        assert!(!rule.prefers(&long_light, &short_heavy));
    }

    #[test]
    fn test_heaviest_chain_ties_keep_local() {
        let rule = HeaviestChain::new(difficulty);
        assert!(!rule.prefers(&chain_of(&[2, 2]), &chain_of(&[4])));
    }
}
