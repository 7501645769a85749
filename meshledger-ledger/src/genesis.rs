//! Genesis block creation.
//!
//! Every node on the same network starts from the same first block, so the
//! genesis payload is a fixed constant.

use serde_json::{json, Map, Value};

use crate::block::Block;

/// Fixed timestamp carried by the genesis block (2024-01-01 00:00:00 UTC).
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200;

/// Data string carried by the genesis block.
pub const GENESIS_DATA: &str = "genesis";

fn genesis_payload() -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("height".to_string(), json!(0));
    payload.insert("timestamp".to_string(), json!(GENESIS_TIMESTAMP));
    payload.insert("data".to_string(), json!(GENESIS_DATA));
    payload
}

/// Create the genesis block.
///
/// The genesis block is deterministic: calling this function always
/// produces an identical block.
pub fn genesis_block() -> Block {
    Block::from_object(genesis_payload())
}
