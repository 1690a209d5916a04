//! In-memory coordination store for discovery tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{CoordinationStore, CoreError, KeyValue, PrefixRead, WatchBatch, WatchStream};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Store with a fixed bootstrap read and a watch fed by the test through `events`.
pub struct MemoryStore {
    kvs: Vec<KeyValue>,
    revision: Option<i64>,
    fail_connect: bool,
    fail_get: bool,
    watch: Mutex<Option<mpsc::Receiver<WatchBatch>>>,
    pub watch_revisions: Mutex<Vec<Option<i64>>>,
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
}

impl MemoryStore {
    /// Store plus the sender driving its watch stream. Dropping the sender ends the stream.
    pub fn new(kvs: Vec<KeyValue>) -> (Self, mpsc::Sender<WatchBatch>) {
        let (tx, rx) = mpsc::channel(16);
        let store = Self {
            kvs,
            revision: None,
            fail_connect: false,
            fail_get: false,
            watch: Mutex::new(Some(rx)),
            watch_revisions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        };
        (store, tx)
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_get(mut self) -> Self {
        self.fail_get = true;
        self
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn connect(&self) -> Result<(), CoreError> {
        if self.fail_connect {
            return Err(CoreError::Connect("connection refused".into()));
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead, CoreError> {
        if self.fail_get {
            return Err(CoreError::Store("deadline exceeded".into()));
        }
        let kvs = self
            .kvs
            .iter()
            .filter(|kv| kv.key.starts_with(prefix.as_bytes()))
            .cloned()
            .collect();
        Ok(PrefixRead {
            kvs,
            revision: self.revision,
        })
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, CoreError> {
        self.watch_revisions.lock().unwrap().push(start_revision);
        let rx = self
            .watch
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CoreError::Store("already watching".into()))?;
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn kv(key: &str, addr: &str) -> KeyValue {
    KeyValue::new(key, format!(r#"{{"addr":"{addr}"}}"#))
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
