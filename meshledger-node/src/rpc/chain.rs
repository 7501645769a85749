//! Chain-related RPC methods.

use std::sync::Arc;

use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};

use meshledger_ledger::{Block, Chain};

use super::{RpcState, BLOCK_NOT_FOUND};

/// Summary of the local chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub length: usize,
    pub genesis: Option<Block>,
    pub tip: Option<Block>,
}

impl From<&Chain> for ChainSummary {
    fn from(chain: &Chain) -> Self {
        Self {
            length: chain.len(),
            genesis: chain.genesis().cloned(),
            tip: chain.tip().cloned(),
        }
    }
}

/// Look up the block at `index`.
fn block_at(chain: &Chain, index: usize) -> Result<Block, ErrorObjectOwned> {
    chain.blocks().get(index).cloned().ok_or_else(|| {
        ErrorObjectOwned::owned(
            BLOCK_NOT_FOUND,
            format!("No block at index {index}, chain length is {}", chain.len()),
            None::<()>,
        )
    })
}

/// Register chain RPC methods.
pub fn register_methods(module: &mut RpcModule<Arc<RpcState>>) -> anyhow::Result<()> {
    // getChain - the whole local chain as a JSON array
    module.register_async_method("getChain", |_params, state, _| async move {
        let chain = state.ledger().current_chain();
        Ok::<_, ErrorObjectOwned>(Chain::clone(&chain))
    })?;

    module.register_async_method("getChainLength", |_params, state, _| async move {
        Ok::<_, ErrorObjectOwned>(state.ledger().len())
    })?;

    // getBlock - one block by position, 0 is genesis
    module.register_async_method("getBlock", |params, state, _| async move {
        let index: usize = params.one()?;
        let chain = state.ledger().current_chain();
        block_at(&chain, index)
    })?;

    module.register_async_method("getChainSummary", |_params, state, _| async move {
        let chain = state.ledger().current_chain();
        Ok::<_, ErrorObjectOwned>(ChainSummary::from(chain.as_ref()))
    })?;

    Ok(())
}
