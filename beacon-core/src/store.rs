//! Coordination-store contract consumed by discovery: connect, one prefix read, one prefix watch.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::CoreError;

/// Raw key/value pair as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Result of a prefix read. `revision` is the store revision the read observed, when the store has one.
#[derive(Clone, Debug, Default)]
pub struct PrefixRead {
    pub kvs: Vec<KeyValue>,
    pub revision: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One change under the watched prefix. `value` is empty for deletes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WatchEvent {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// Events delivered together, in store order.
pub type WatchBatch = Vec<WatchEvent>;

/// Change subscription. The stream ending means the subscription is gone (cancelled or connection lost).
pub type WatchStream = BoxStream<'static, WatchBatch>;

/// Distributed key-value store used as the registration backend. Implementations: etcd, in-memory fakes.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Establish the connection. Called once per discovery start.
    async fn connect(&self) -> Result<(), CoreError>;

    /// All current pairs whose key starts with `prefix`.
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead, CoreError>;

    /// Subscribe to changes under `prefix`, starting at `start_revision` when given.
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, CoreError>;

    /// Drop the connection. Must be idempotent.
    fn close(&self);
}
