//! Discovery service: bootstrap read, background watch loop, filtered endpoint snapshot.
//!
//! Lifecycle: `Unstarted` -> `start()` -> `Bootstrapping` -> `Watching` -> `close()` -> `Closed`.
//! A failed bootstrap returns to `Unstarted`. When the store ends the watch stream the state moves
//! to `Stale`: the snapshot stays readable but no longer updates; there is no resubscription.
//! `wait_closed()` reports why the watch task ended.
//!
//! The watch task only holds a weak reference to the shared state. Dropping the last handle
//! without `close()` drops the shutdown sender, which ends the task and closes the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::key::{service_prefix, split_id, DEFAULT_KEY_ROOT};
use crate::metadata::{KvPair, Metadata};
use crate::registry::{Filter, Registry};
use crate::service_discovery::ServiceDiscovery;
use crate::store::{CoordinationStore, EventKind, WatchBatch};
use crate::CoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryState {
    Unstarted,
    Bootstrapping,
    Watching,
    /// The store ended the watch; the last snapshot is served unchanged.
    Stale,
    Closed,
}

/// Why the watch task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchExit {
    /// `close()` was called.
    Cancelled,
    /// The store ended the subscription (e.g. connection loss).
    StreamClosed,
    /// The subscription could not be opened.
    SubscribeFailed,
}

struct Lifecycle {
    state: DiscoveryState,
    shutdown: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<WatchExit>>,
}

struct Inner {
    service: String,
    prefix: String,
    store: Arc<dyn CoordinationStore>,
    registry: Registry,
    filter: RwLock<Option<Filter>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Inner {
    fn endpoint_id(&self, key: &[u8]) -> Option<String> {
        let key = std::str::from_utf8(key).ok()?;
        split_id(&self.prefix, key).map(str::to_owned)
    }

    fn rebuild(&self) -> usize {
        let filter = self
            .filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.registry.rebuild(filter.as_deref())
    }

    /// Apply one batch in delivery order, then rebuild once.
    fn apply_batch(&self, batch: WatchBatch) {
        let events = batch.len();
        for event in batch {
            let Some(id) = self.endpoint_id(&event.key) else {
                debug!(prefix = %self.prefix, key = %String::from_utf8_lossy(&event.key), "ignoring key outside prefix");
                continue;
            };
            match event.kind {
                EventKind::Delete => {
                    self.registry.remove(&id);
                    debug!(prefix = %self.prefix, %id, "endpoint deregistered");
                }
                EventKind::Put => match Metadata::decode(&event.value) {
                    Ok(metadata) => {
                        debug!(prefix = %self.prefix, %id, addr = %metadata.addr, "endpoint registered");
                        self.registry.upsert(id, metadata);
                    }
                    Err(e) => {
                        warn!(prefix = %self.prefix, %id, error = %e, "skipping malformed registration");
                    }
                },
            }
        }
        let live = self.rebuild();
        debug!(prefix = %self.prefix, events, live, "applied watch batch");
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The watch task ended on its own; `close()` still moves on to `Closed`.
    fn mark_stale(&self) {
        let mut lc = self.lifecycle();
        if lc.state == DiscoveryState::Watching {
            lc.state = DiscoveryState::Stale;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lc = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if lc.state != DiscoveryState::Closed {
            self.store.close();
            debug!(prefix = %self.prefix, "discovery dropped without close");
        }
    }
}

/// Discovery for one key prefix. Cloning yields a handle on the same registry and watch.
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<Inner>,
}

impl Discovery {
    /// Discovery for `service` under the default `register/` root.
    pub fn new(service: &str, store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_prefix(service, service_prefix(DEFAULT_KEY_ROOT, service), store)
    }

    /// Discovery watching an explicit key prefix (e.g. `register/orders/`).
    pub fn with_prefix(
        service: &str,
        prefix: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.to_owned(),
                prefix: prefix.into(),
                store,
                registry: Registry::new(),
                filter: RwLock::new(None),
                lifecycle: Mutex::new(Lifecycle {
                    state: DiscoveryState::Unstarted,
                    shutdown: None,
                    task: None,
                }),
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle()
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// `Watching` means the watch task is running; it becomes `Stale` once the store ends the stream.
    pub fn state(&self) -> DiscoveryState {
        self.lifecycle().state
    }

    /// Connect, load every registration under the prefix, then spawn the watch task.
    /// Connect or read failures are returned and leave the discovery `Unstarted`.
    /// Must be called within a Tokio runtime.
    pub async fn start(&self) -> Result<(), CoreError> {
        {
            let mut lc = self.lifecycle();
            match lc.state {
                DiscoveryState::Unstarted => lc.state = DiscoveryState::Bootstrapping,
                DiscoveryState::Closed => return Err(CoreError::Closed),
                DiscoveryState::Bootstrapping
                | DiscoveryState::Watching
                | DiscoveryState::Stale => {
                    return Err(CoreError::AlreadyStarted)
                }
            }
        }

        let revision = match self.bootstrap().await {
            Ok(revision) => revision,
            Err(e) => {
                let mut lc = self.lifecycle();
                if lc.state == DiscoveryState::Bootstrapping {
                    lc.state = DiscoveryState::Unstarted;
                }
                error!(prefix = %self.inner.prefix, error = %e, "discovery bootstrap failed");
                return Err(e);
            }
        };

        let mut lc = self.lifecycle();
        if lc.state != DiscoveryState::Bootstrapping {
            // close() raced the bootstrap.
            return Err(CoreError::Closed);
        }
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(watch_loop(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.store),
            self.inner.prefix.clone(),
            revision,
            shutdown_rx,
        ));
        lc.shutdown = Some(shutdown_tx);
        lc.task = Some(task);
        lc.state = DiscoveryState::Watching;
        Ok(())
    }

    async fn bootstrap(&self) -> Result<Option<i64>, CoreError> {
        let inner = &self.inner;
        inner.store.connect().await?;
        let read = inner.store.get_prefix(&inner.prefix).await?;

        let mut skipped = 0usize;
        for kv in &read.kvs {
            let Some(id) = inner.endpoint_id(&kv.key) else {
                continue;
            };
            match Metadata::decode(&kv.value) {
                Ok(metadata) => {
                    inner.registry.upsert(id, metadata);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(prefix = %inner.prefix, %id, error = %e, "skipping malformed registration");
                }
            }
        }
        let live = inner.rebuild();
        info!(
            prefix = %inner.prefix,
            live,
            skipped,
            revision = ?read.revision,
            "discovery bootstrapped"
        );
        Ok(read.revision)
    }

    /// Current endpoint snapshot; empty before bootstrap completes.
    pub fn services(&self) -> Arc<[KvPair]> {
        self.inner.registry.snapshot()
    }

    /// Copy of the endpoint set keyed by endpoint identifier.
    pub fn endpoints(&self) -> HashMap<String, Metadata> {
        self.inner.registry.endpoints()
    }

    /// Install the snapshot predicate. Takes effect at the next rebuild (next batch or `refresh`).
    pub fn set_filter(&self, filter: Filter) {
        *self
            .inner
            .filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(filter);
    }

    pub fn clear_filter(&self) {
        *self
            .inner
            .filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Rebuild the snapshot now with the current filter. Returns the snapshot length.
    pub fn refresh(&self) -> usize {
        self.inner.rebuild()
    }

    /// True while the watch task is alive.
    pub fn is_watching(&self) -> bool {
        let lc = self.lifecycle();
        lc.state == DiscoveryState::Watching
            && lc.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the subscription and drop the store connection. Idempotent, never blocks.
    /// Use `wait_closed` to join the watch task.
    pub fn close(&self) {
        let shutdown = {
            let mut lc = self.lifecycle();
            if lc.state == DiscoveryState::Closed {
                return;
            }
            lc.state = DiscoveryState::Closed;
            lc.shutdown.take()
        };
        if let Some(tx) = shutdown {
            let _ = tx.try_send(());
        }
        self.inner.store.close();
        info!(prefix = %self.inner.prefix, "discovery closed");
    }

    /// Wait for the watch task to end and report why. `None` if it was never spawned
    /// or another caller already joined it.
    pub async fn wait_closed(&self) -> Option<WatchExit> {
        let task = self.lifecycle().task.take()?;
        task.await.ok()
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("service", &self.inner.service)
            .field("prefix", &self.inner.prefix)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceDiscovery for Discovery {
    fn services(&self) -> Arc<[KvPair]> {
        Discovery::services(self)
    }

    /// Shares registry and watch with `self`: every clone observes the same prefix.
    fn clone_for(&self, service_name: &str) -> Result<Box<dyn ServiceDiscovery>, CoreError> {
        debug!(prefix = %self.inner.prefix, service = service_name, "sharing discovery handle");
        Ok(Box::new(self.clone()))
    }

    fn set_filter(&self, filter: Filter) {
        Discovery::set_filter(self, filter)
    }

    fn close(&self) {
        Discovery::close(self)
    }
}

/// Owns the subscription. Shared state is reached through `inner` only while applying a batch,
/// so the task never keeps the handles' state (and with it the shutdown sender) alive.
async fn watch_loop(
    inner: Weak<Inner>,
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    bootstrap_revision: Option<i64>,
    mut shutdown: mpsc::Receiver<()>,
) -> WatchExit {
    let start_revision = bootstrap_revision.map(|rev| rev + 1);
    let mut stream = tokio::select! {
        biased;
        _ = shutdown.recv() => return WatchExit::Cancelled,
        opened = store.watch_prefix(&prefix, start_revision) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(%prefix, error = %e, "watch subscription failed; endpoints will not update");
                if let Some(inner) = inner.upgrade() {
                    inner.mark_stale();
                }
                return WatchExit::SubscribeFailed;
            }
        },
    };
    debug!(%prefix, ?start_revision, "watching");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!(%prefix, "watch cancelled");
                return WatchExit::Cancelled;
            }
            batch = stream.next() => match (batch, inner.upgrade()) {
                (_, None) => {
                    debug!(%prefix, "discovery dropped; ending watch");
                    return WatchExit::Cancelled;
                }
                (Some(batch), Some(inner)) => inner.apply_batch(batch),
                (None, Some(inner)) => {
                    warn!(%prefix, "watch stream closed; serving last snapshot");
                    inner.mark_stale();
                    return WatchExit::StreamClosed;
                }
            },
        }
    }
}
