//! Key-value configuration store backing the policy cache.
//!
//! The engine talks to the store through [`ConfigStore`], so tests can run
//! against [`MemoryStore`] while deployments use [`EtcdStore`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, WatchOptions};
use tokio::sync::{mpsc, Mutex};

use crate::errors::StoreError;

/// Buffer size for watch channels. Watch-triggered refreshes drain the
/// channel eagerly, so the buffer only has to absorb short bursts.
pub const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// A single change under a watched prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Subscribe to changes under `prefix`. The stream ends when the
    /// server-side watch is lost; callers are expected to resubscribe.
    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<StoreEvent>, StoreError>;
}

// ─── etcd ───────────────────────────────────────────────────────────────

/// Store backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(
        endpoints: &[String],
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(connect_timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        tracing::debug!(?endpoints, "Connected to config store");
        Ok(Self { client })
    }
}

#[async_trait]
impl ConfigStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut client = self.client.kv_client();
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|pair| pair.value().to_vec()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut client = self.client.kv_client();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|pair| KeyValue {
                key: String::from_utf8_lossy(pair.key()).into_owned(),
                value: pair.value().to_vec(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut client = self.client.kv_client();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<StoreEvent>, StoreError> {
        let mut watch_client = self.client.watch_client();
        let (watcher, mut stream) = watch_client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            // Dropping the watcher cancels the server-side watch, so it
            // lives as long as the pump.
            let _watcher = watcher;
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(pair) = event.kv() else { continue };
                    let item = StoreEvent {
                        key: String::from_utf8_lossy(pair.key()).into_owned(),
                        value: pair.value().to_vec(),
                    };
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────

/// In-memory store with the same watch semantics, for tests.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    watchers: Mutex<Vec<(String, mpsc::Sender<StoreEvent>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.data
            .lock()
            .await
            .insert(key.to_string(), value.clone());

        let subscribers: Vec<mpsc::Sender<StoreEvent>> = {
            let mut watchers = self.watchers.lock().await;
            watchers.retain(|(_, tx)| !tx.is_closed());
            watchers
                .iter()
                .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in subscribers {
            let event = StoreEvent {
                key: key.to_string(),
                value: value.clone(),
            };
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<StoreEvent>, StoreError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.watchers.lock().await.push((prefix.to_string(), tx));
        Ok(rx)
    }
}
