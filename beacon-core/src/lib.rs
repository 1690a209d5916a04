//! Beacon core: endpoint registry, coordination-store contract, discovery watch loop.

pub mod discovery;
pub mod key;
pub mod metadata;
pub mod registry;
pub mod service_discovery;
pub mod store;

pub use discovery::{Discovery, DiscoveryState, WatchExit};
pub use key::{service_prefix, split_id, DEFAULT_KEY_ROOT};
pub use metadata::{KvPair, Metadata};
pub use registry::{Filter, Registry};
pub use service_discovery::ServiceDiscovery;
pub use store::{CoordinationStore, EventKind, KeyValue, PrefixRead, WatchBatch, WatchEvent, WatchStream};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("coordination store error: {0}")]
    Store(String),
    #[error("invalid registration payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("discovery already started")]
    AlreadyStarted,
    #[error("discovery closed")]
    Closed,
}
