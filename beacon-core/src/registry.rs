//! Registry snapshot store: the endpoint set and its derived address list behind one read/write lock.
//!
//! The snapshot is rebuilt in full from the endpoint set, never patched. A rebuild costs
//! O(endpoints) and runs once per applied change batch; registrations churn far less often
//! than transports read the snapshot.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::metadata::{KvPair, Metadata};

/// Snapshot predicate: keep the entry when it returns true.
pub type Filter = Arc<dyn Fn(&KvPair) -> bool + Send + Sync>;

struct Inner {
    services: HashMap<String, Metadata>,
    pairs: Arc<[KvPair]>,
}

/// Endpoint set keyed by endpoint identifier, plus the last rebuilt snapshot.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                services: HashMap::with_capacity(8),
                pairs: Arc::from(Vec::new()),
            }),
        }
    }

    // Every critical section leaves the map consistent, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `id`. The snapshot is untouched until `rebuild`.
    pub fn upsert(&self, id: impl Into<String>, metadata: Metadata) -> Option<Metadata> {
        self.write().services.insert(id.into(), metadata)
    }

    /// Delete the entry for `id`; absent ids are not an error.
    pub fn remove(&self, id: &str) -> Option<Metadata> {
        self.write().services.remove(id)
    }

    /// Recompute the snapshot from the endpoint set, keeping entries accepted by `filter`
    /// (all entries when there is none). Readers see the old or the new snapshot, never a mix.
    /// Returns the new snapshot length.
    pub fn rebuild(&self, filter: Option<&(dyn Fn(&KvPair) -> bool + Send + Sync)>) -> usize {
        let mut inner = self.write();
        let pairs: Vec<KvPair> = inner
            .services
            .values()
            .map(Metadata::to_pair)
            .filter(|pair| filter.map_or(true, |keep| keep(pair)))
            .collect();
        let len = pairs.len();
        inner.pairs = Arc::from(pairs);
        len
    }

    /// Last rebuilt snapshot. Order is unspecified.
    pub fn snapshot(&self) -> Arc<[KvPair]> {
        Arc::clone(&self.read().pairs)
    }

    pub fn get(&self, id: &str) -> Option<Metadata> {
        self.read().services.get(id).cloned()
    }

    /// Copy of the endpoint set.
    pub fn endpoints(&self) -> HashMap<String, Metadata> {
        self.read().services.clone()
    }

    pub fn len(&self) -> usize {
        self.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().services.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn addrs(pairs: &[KvPair]) -> HashSet<String> {
        pairs.iter().map(|p| p.value.clone()).collect()
    }

    #[test]
    fn upsert_replaces_and_remove_is_lenient() {
        let reg = Registry::new();
        assert!(reg.upsert("a", Metadata::new("", "h:1")).is_none());
        let old = reg.upsert("a", Metadata::new("", "h:2")).unwrap();
        assert_eq!(old.addr, "h:1");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().addr, "h:2");
        assert!(reg.remove("missing").is_none());
        assert!(reg.remove("a").is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_changes_only_on_rebuild() {
        let reg = Registry::new();
        reg.upsert("a", Metadata::new("", "h:1"));
        assert!(reg.snapshot().is_empty());
        assert_eq!(reg.rebuild(None), 1);
        assert_eq!(addrs(&reg.snapshot()), HashSet::from(["h:1".to_string()]));
        reg.remove("a");
        assert_eq!(reg.snapshot().len(), 1);
        reg.rebuild(None);
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn rebuild_applies_filter() {
        let reg = Registry::new();
        reg.upsert("a", Metadata::new("", "10.0.0.1:9000"));
        reg.upsert("b", Metadata::new("", "10.0.0.2:9000"));
        reg.upsert("c", Metadata::new("", "192.168.0.1:9000"));
        let private: Filter = Arc::new(|p: &KvPair| p.value.starts_with("10."));
        assert_eq!(reg.rebuild(Some(private.as_ref())), 2);
        assert_eq!(
            addrs(&reg.snapshot()),
            HashSet::from(["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()])
        );
        assert_eq!(reg.rebuild(None), 3);
    }

    #[test]
    fn old_snapshot_survives_rebuild() {
        let reg = Registry::new();
        reg.upsert("a", Metadata::new("", "h:1"));
        reg.rebuild(None);
        let held = reg.snapshot();
        reg.remove("a");
        reg.rebuild(None);
        assert_eq!(held.len(), 1);
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn readers_never_see_partial_snapshot() {
        const N: usize = 200;
        let reg = Arc::new(Registry::new());
        for i in 0..N {
            reg.upsert(format!("id-{i}"), Metadata::new("", format!("h:{i}")));
        }
        reg.rebuild(None);

        let writer = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                let none: Filter = Arc::new(|_: &KvPair| false);
                for round in 0..500 {
                    if round % 2 == 0 {
                        reg.rebuild(Some(none.as_ref()));
                    } else {
                        reg.rebuild(None);
                    }
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let len = reg.snapshot().len();
                        assert!(len == 0 || len == N, "partial snapshot of {len}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
