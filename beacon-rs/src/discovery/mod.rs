//! Discovery: DiscoveryModule builder, etcd store, static discovery.

mod etcd;
mod static_discovery;

pub use etcd::EtcdStore;
pub use static_discovery::StaticDiscovery;

use std::sync::Arc;

use beacon_core::{CoordinationStore, CoreError, Discovery, Filter, KvPair};

use crate::config::DiscoveryConfig;

/// Discovery as object: service name, config, optional store and filter.
/// `start()` returns a running `Discovery`; without an explicit store an `EtcdStore` is built from the config.
pub struct DiscoveryModule {
    service: String,
    config: DiscoveryConfig,
    store: Option<Arc<dyn CoordinationStore>>,
    filter: Option<Filter>,
}

impl DiscoveryModule {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            config: DiscoveryConfig::default(),
            store: None,
            filter: None,
        }
    }

    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom coordination store instead of etcd.
    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Snapshot filter, installed before bootstrap so the first snapshot is already filtered.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&KvPair) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Validate the config and assemble an unstarted discovery.
    pub fn build(self) -> Result<Discovery, CoreError> {
        self.config.validate()?;
        let prefix = self.config.prefix_for(&self.service);
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(EtcdStore::new(self.config)) as Arc<dyn CoordinationStore>,
        };
        let discovery = Discovery::with_prefix(&self.service, prefix, store);
        if let Some(filter) = self.filter {
            discovery.set_filter(filter);
        }
        Ok(discovery)
    }

    /// Build and start: bootstrap read done, watch task running.
    pub async fn start(self) -> Result<Discovery, CoreError> {
        let discovery = self.build()?;
        discovery.start().await?;
        Ok(discovery)
    }
}
