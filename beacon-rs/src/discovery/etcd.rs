//! etcd-backed coordination store: prefix get and prefix watch.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use beacon_core::{
    CoordinationStore, CoreError, EventKind, KeyValue, PrefixRead, WatchEvent, WatchStream,
};
use etcd_client::{Client, ConnectOptions, Event, EventType, GetOptions, WatchOptions};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;

/// etcd client wrapper. Connects on `connect()`; `close()` drops the client.
pub struct EtcdStore {
    config: DiscoveryConfig,
    client: Mutex<Option<Client>>,
}

impl EtcdStore {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client, CoreError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| CoreError::Store("etcd client not connected".to_string()))
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new()
            .with_connect_timeout(self.config.connect_timeout())
            .with_keep_alive(
                self.config.keep_alive_interval(),
                self.config.keep_alive_timeout(),
            )
    }
}

fn convert_event(event: &Event) -> Option<WatchEvent> {
    let kv = event.kv()?;
    let kind = match event.event_type() {
        EventType::Put => EventKind::Put,
        EventType::Delete => EventKind::Delete,
    };
    Some(WatchEvent {
        kind,
        key: kv.key().to_vec(),
        value: kv.value().to_vec(),
    })
}

/// What the adapter does with one watch response.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Creation acks and progress notifications carry no events.
    Skip,
    Deliver,
    End,
}

fn step_for(canceled: bool, event_count: usize) -> Step {
    if canceled {
        Step::End
    } else if event_count == 0 {
        Step::Skip
    } else {
        Step::Deliver
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn connect(&self) -> Result<(), CoreError> {
        let client = Client::connect(&self.config.endpoints, Some(self.connect_options()))
            .await
            .map_err(|e| CoreError::Connect(format!("failed to connect to etcd: {}", e)))?;
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        info!(endpoints = ?self.config.endpoints, "connected to etcd");
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead, CoreError> {
        let mut client = self.client()?;
        // Per-call deadline: a channel-wide timeout would also cut the watch stream.
        let response = tokio::time::timeout(
            self.config.request_timeout(),
            client.get(prefix, Some(GetOptions::new().with_prefix())),
        )
        .await
        .map_err(|_| CoreError::Store(format!("timed out reading {} from etcd", prefix)))?
        .map_err(|e| CoreError::Store(format!("failed to read {} from etcd: {}", prefix, e)))?;

        let kvs: Vec<KeyValue> = response
            .kvs()
            .iter()
            .map(|kv| KeyValue::new(kv.key(), kv.value()))
            .collect();
        let revision = response.header().map(|h| h.revision());
        debug!(prefix, count = kvs.len(), ?revision, "read registrations from etcd");
        Ok(PrefixRead { kvs, revision })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchStream, CoreError> {
        let mut client = self.client()?;
        let mut options = WatchOptions::new().with_prefix();
        if let Some(revision) = start_revision {
            options = options.with_start_revision(revision);
        }
        let (watcher, responses) = client
            .watch(prefix, Some(options))
            .await
            .map_err(|e| CoreError::Store(format!("failed to watch {} in etcd: {}", prefix, e)))?;

        // The watcher rides along in the stream state: dropping the stream ends the subscription.
        let batches = stream::unfold((watcher, responses), |(watcher, mut responses)| async move {
            loop {
                match responses.message().await {
                    Ok(Some(response)) => {
                        match step_for(response.canceled(), response.events().len()) {
                            Step::End => {
                                warn!(reason = response.cancel_reason(), "etcd watch cancelled");
                                return None;
                            }
                            Step::Skip => {
                                debug!(created = response.created(), "etcd watch response without events");
                                continue;
                            }
                            Step::Deliver => {
                                let batch: Vec<WatchEvent> =
                                    response.events().iter().filter_map(convert_event).collect();
                                return Some((batch, (watcher, responses)));
                            }
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(error = %e, "etcd watch stream failed");
                        return None;
                    }
                }
            }
        });
        Ok(batches.boxed())
    }

    fn close(&self) {
        if self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("etcd connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_before_connect_fail() {
        let store = EtcdStore::new(DiscoveryConfig::default());
        assert!(matches!(store.get_prefix("register/pay/").await, Err(CoreError::Store(_))));
        assert!(store.watch_prefix("register/pay/", None).await.is_err());
        store.close();
        store.close();
    }

    #[test]
    fn watch_responses_map_to_steps() {
        assert_eq!(step_for(false, 0), Step::Skip);
        assert_eq!(step_for(false, 3), Step::Deliver);
        assert_eq!(step_for(true, 0), Step::End);
        // A cancel ends the stream even if the response still carries events.
        assert_eq!(step_for(true, 2), Step::End);
    }
}
