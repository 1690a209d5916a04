//! Endpoint metadata decoded from registration values, and the address pairs handed to transports.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Registration payload of one service instance. Only `addr` is required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Protocol tag (e.g. "tcp"), empty when the registrant did not send one.
    #[serde(default)]
    pub schema: String,
    pub addr: String,
}

impl Metadata {
    pub fn new(schema: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            addr: addr.into(),
        }
    }

    /// Decode one registration value (JSON object). Each value decodes independently of the others.
    pub fn decode(raw: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Snapshot entry for this endpoint: the address on both sides.
    pub fn to_pair(&self) -> KvPair {
        KvPair {
            key: self.addr.clone(),
            value: self.addr.clone(),
        }
    }
}

/// One entry of the endpoint snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}
