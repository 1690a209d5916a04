//! RPC protocols: RpcError, RpcTransport.

use async_trait::async_trait;
use beacon_core::{CoreError, KvPair};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("[{code}] {message}")]
    Server { code: String, message: String },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("client not started")]
    NotStarted,
    #[error(transparent)]
    Discovery(#[from] CoreError),
}

/// RPC transport: picks an endpoint from the snapshot and performs the call.
/// Connection pooling, selection, retries and timeouts live behind this trait.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(
        &self,
        endpoints: &[KvPair],
        service: &str,
        method: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError>;
}
