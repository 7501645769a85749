//! Block payloads.
//!
//! The ledger treats a block as an opaque JSON object. The only check made
//! here is structural: a block must be an object, so `null`, scalars and
//! arrays are refused when a block is built or decoded. Anything deeper
//! (hash linkage, proof-of-work) belongs to the owner of the ledger.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LedgerError, LedgerResult};

/// An immutable block payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Block {
    payload: Map<String, Value>,
}

impl Block {
    /// Build a block from a JSON value, rejecting anything but an object.
    pub fn new(value: Value) -> LedgerResult<Self> {
        match value {
            Value::Object(payload) => Ok(Self::from_object(payload)),
            other => Err(LedgerError::InvalidPayload {
                kind: json_kind(&other),
            }),
        }
    }

    /// Build a block from an already-checked object.
    pub(crate) fn from_object(payload: Map<String, Value>) -> Self {
        Self { payload }
    }

    /// Get the raw payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Look up a top-level field of the payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

impl TryFrom<Value> for Block {
    type Error = LedgerError;

    fn try_from(value: Value) -> LedgerResult<Self> {
        Block::new(value)
    }
}

impl From<Block> for Value {
    fn from(block: Block) -> Self {
        Value::Object(block.payload)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
