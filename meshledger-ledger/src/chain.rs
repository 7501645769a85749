//! Ordered block sequences.

use serde::{Deserialize, Serialize};

use crate::block::Block;

/// An ordered sequence of blocks, oldest first.
///
/// A chain is a value: extending it produces a new chain and the ledger
/// swaps whole chains, so a reader holding a chain never sees it change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// Create a chain from blocks in canonical order.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Create a chain holding only the given genesis block.
    pub fn from_genesis(genesis: Block) -> Self {
        Self {
            blocks: vec![genesis],
        }
    }

    /// Number of blocks in the chain.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the chain has no blocks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get the blocks in canonical order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Iterate over the blocks in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    /// Get the first block.
    pub fn genesis(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Get the last block.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Return a new chain with `block` appended.
    pub fn with_block(&self, block: Block) -> Self {
        let mut blocks = Vec::with_capacity(self.blocks.len() + 1);
        blocks.extend(self.blocks.iter().cloned());
        blocks.push(block);
        Self { blocks }
    }

    /// Sum a per-block work metric over the whole chain.
    pub fn work_with<W>(&self, work: W) -> u128
    where
        W: Fn(&Block) -> u128,
    {
        self.blocks
            .iter()
            .fold(0u128, |total, block| total.saturating_add(work(block)))
    }
}

impl From<Vec<Block>> for Chain {
    fn from(blocks: Vec<Block>) -> Self {
        Self::new(blocks)
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}
