//! RPC: RpcClient over a discovery snapshot and a pluggable transport.

mod protocol;

pub use protocol::{RpcError, RpcTransport};

use std::sync::Arc;

use beacon_core::{CoordinationStore, CoreError, Discovery, ServiceDiscovery};
use serde_json::Value;
use tracing::info;

use crate::config::DiscoveryConfig;
use crate::discovery::{DiscoveryModule, EtcdStore};

/// Client for one logical service: discovery keeps the endpoint list fresh, the transport calls.
pub struct RpcClient {
    service: String,
    config: DiscoveryConfig,
    transport: Box<dyn RpcTransport>,
    discovery: Option<Discovery>,
}

impl RpcClient {
    pub fn new(service: &str, config: DiscoveryConfig, transport: Box<dyn RpcTransport>) -> Self {
        Self {
            service: service.to_string(),
            config,
            transport,
            discovery: None,
        }
    }

    /// Start discovery over etcd. Fails when etcd is unreachable or the bootstrap read fails.
    pub async fn start(&mut self) -> Result<(), RpcError> {
        let store = Arc::new(EtcdStore::new(self.config.clone()));
        self.start_with_store(store).await
    }

    /// Start discovery over any coordination store.
    pub async fn start_with_store(
        &mut self,
        store: Arc<dyn CoordinationStore>,
    ) -> Result<(), RpcError> {
        if self.discovery.is_some() {
            return Err(CoreError::AlreadyStarted.into());
        }
        let discovery = DiscoveryModule::new(&self.service)
            .config(self.config.clone())
            .store(store)
            .start()
            .await?;
        info!(
            service = %self.service,
            endpoints = discovery.services().len(),
            "rpc client started"
        );
        self.discovery = Some(discovery);
        Ok(())
    }

    pub fn discovery(&self) -> Option<&Discovery> {
        self.discovery.as_ref()
    }

    /// Call `method` on `service`. Body is `{"method": .., "params": ..}`; the reply must be JSON.
    pub async fn call(&self, service: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let discovery = self.discovery.as_ref().ok_or(RpcError::NotStarted)?;
        call(discovery, self.transport.as_ref(), service, method, params).await
    }

    /// Close discovery. Idempotent; a closed client cannot be restarted.
    pub fn close(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.close();
        }
    }
}

/// Helper: call service by name using any discovery and transport.
pub async fn call(
    discovery: &dyn ServiceDiscovery,
    transport: &dyn RpcTransport,
    service: &str,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let endpoints = discovery.services();
    if endpoints.is_empty() {
        return Err(RpcError::ServiceUnavailable(format!(
            "service {:?} has no live endpoints",
            service
        )));
    }
    let body = serde_json::json!({ "method": method, "params": params });
    let req = serde_json::to_vec(&body).map_err(|e| RpcError::Transport(e.to_string()))?;
    let bytes = transport.call(&endpoints, service, method, &req).await?;
    serde_json::from_slice(&bytes).map_err(|e| RpcError::Transport(e.to_string()))
}
