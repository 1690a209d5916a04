//! Service discovery contract expected by RPC transports: current endpoint list plus lifecycle.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::metadata::KvPair;
use crate::registry::Filter;
use crate::CoreError;

/// How a transport obtains endpoints. Implementations: `Discovery` (coordination store), static lists.
pub trait ServiceDiscovery: Send + Sync {
    /// Current endpoint snapshot. Never waits on background updates.
    fn services(&self) -> Arc<[KvPair]>;

    /// Addresses of the current snapshot. Handles are bound to one key prefix, so the name is not consulted.
    fn resolve(&self, _service_name: &str) -> Vec<String> {
        self.services().iter().map(|p| p.value.clone()).collect()
    }

    /// Push-based snapshot updates. Not supported; always `None`.
    fn watch_service(&self) -> Option<mpsc::Receiver<Arc<[KvPair]>>> {
        None
    }

    /// Counterpart of `watch_service`. No-op.
    fn remove_watcher(&self, _rx: mpsc::Receiver<Arc<[KvPair]>>) {}

    /// Handle for another logical service name.
    fn clone_for(&self, service_name: &str) -> Result<Box<dyn ServiceDiscovery>, CoreError>;

    /// Install the predicate used by future snapshot rebuilds.
    fn set_filter(&self, filter: Filter);

    fn close(&self);
}
