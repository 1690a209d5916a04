//! Beacon Rust facade: etcd-backed discovery, configuration, RPC client on beacon-core.

pub mod config;
pub mod discovery;
pub mod rpc;

pub use config::{ConfigError, DiscoveryConfig};
pub use discovery::{DiscoveryModule, EtcdStore, StaticDiscovery};
pub use rpc::{call, RpcClient, RpcError, RpcTransport};

pub use beacon_core::{
    CoordinationStore, CoreError, Discovery, DiscoveryState, Filter, KvPair, Metadata,
    ServiceDiscovery, WatchExit,
};
