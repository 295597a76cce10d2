//! Persisted prune cache
//!
//! Deposit ids classified as permanently unusable are appended to a durable
//! key-value store local to the caller. The value is an append-only ordered
//! list; ids are never removed because pruning is final.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use openramp_core::DepositId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::IndexResult;

/// Cache namespace: one list of pruned ids per engine instance per network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub network_id: String,
    pub engine_instance_id: String,
}

impl CacheKey {
    pub fn new(network_id: impl Into<String>, engine_instance_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            engine_instance_id: engine_instance_id.into(),
        }
    }

    fn storage_key(&self) -> String {
        format!("{}/{}", self.network_id, self.engine_instance_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Durable store for pruned deposit ids.
#[async_trait]
pub trait PruneStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> IndexResult<Vec<DepositId>>;
    async fn append(&self, key: &CacheKey, ids: &[DepositId]) -> IndexResult<()>;
}

/// In-memory store for tests and short-lived callers.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<DepositId>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PruneStore for MemoryStore {
    async fn load(&self, key: &CacheKey) -> IndexResult<Vec<DepositId>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&key.storage_key())
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, key: &CacheKey, ids: &[DepositId]) -> IndexResult<()> {
        self.entries
            .lock()
            .await
            .entry(key.storage_key())
            .or_default()
            .extend_from_slice(ids);
        Ok(())
    }
}

/// File-backed store: one JSON document mapping storage keys to ordered id
/// lists. Writes rewrite the whole document; prune lists stay small because
/// every id appears at most once.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<DepositId>>>,
}

impl JsonFileStore {
    /// Open the store at `path`, reading any existing document.
    pub fn open(path: impl Into<PathBuf>) -> IndexResult<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, Vec<DepositId>>) -> IndexResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[async_trait]
impl PruneStore for JsonFileStore {
    async fn load(&self, key: &CacheKey) -> IndexResult<Vec<DepositId>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&key.storage_key())
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, key: &CacheKey, ids: &[DepositId]) -> IndexResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.storage_key())
            .or_default()
            .extend_from_slice(ids);
        self.persist(&entries)?;
        debug!(key = %key, count = ids.len(), "pruned ids persisted");
        Ok(())
    }
}
