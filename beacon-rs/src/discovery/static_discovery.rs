//! Fixed endpoint list behind the ServiceDiscovery contract. For local runs and tests without etcd.

use std::sync::Arc;

use beacon_core::{CoreError, Filter, KvPair, Metadata, Registry, ServiceDiscovery};

/// Discovery from static config (endpoint id -> address). The filter applies immediately.
#[derive(Clone)]
pub struct StaticDiscovery {
    registry: Arc<Registry>,
}

impl StaticDiscovery {
    pub fn new(endpoints: impl IntoIterator<Item = (String, Metadata)>) -> Self {
        let registry = Registry::new();
        for (id, metadata) in endpoints {
            registry.upsert(id, metadata);
        }
        registry.rebuild(None);
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Build from a slice of (id, address) pairs.
    pub fn from_slice(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(id, addr)| ((*id).to_string(), Metadata::new("", *addr))),
        )
    }
}

impl Default for StaticDiscovery {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn services(&self) -> Arc<[KvPair]> {
        self.registry.snapshot()
    }

    fn clone_for(&self, _service_name: &str) -> Result<Box<dyn ServiceDiscovery>, CoreError> {
        Ok(Box::new(self.clone()))
    }

    fn set_filter(&self, filter: Filter) {
        self.registry.rebuild(Some(filter.as_ref()));
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_all_addresses() {
        let d = StaticDiscovery::from_slice(&[("a", "h:1"), ("b", "h:2")]);
        let mut addrs = d.resolve("any");
        addrs.sort();
        assert_eq!(addrs, vec!["h:1", "h:2"]);
    }

    #[test]
    fn filter_is_applied_at_once() {
        let d = StaticDiscovery::from_slice(&[("a", "h:1"), ("b", "h:2")]);
        d.set_filter(Arc::new(|p: &KvPair| p.value == "h:2"));
        assert_eq!(d.resolve("any"), vec!["h:2"]);
        let clone = d.clone_for("other").unwrap();
        assert_eq!(clone.services().len(), 1);
    }

    #[test]
    fn default_is_empty() {
        assert!(StaticDiscovery::default().services().is_empty());
    }
}
