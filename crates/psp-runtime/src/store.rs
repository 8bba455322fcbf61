//! Durable key/value store
//!
//! The coordinator keeps nothing it cannot rebuild from here. `MemoryStore`
//! stands in for the host's storage in tests and can be shared between two
//! coordinator instances to simulate a restart; `JsonFileStore` persists to a
//! single JSON file and survives real process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;

/// Host-provided durable key/value facility.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// Store backed by one JSON object on disk.
///
/// The file is read lazily on first access and rewritten in full on every
/// mutation via a temp file and rename, so a crash mid-write leaves the
/// previous version intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, Value>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        log::debug!("store written: {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }

    /// Run `f` against the loaded map; persist if it reports a change.
    async fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        let entries = cache.get_or_insert_with(BTreeMap::new);
        let (out, changed) = f(entries);
        if changed {
            self.write_file(entries).await?;
        }
        Ok(out)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_entries(|entries| (entries.get(key).cloned(), false)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value);
            ((), true)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            let changed = entries.remove(key).is_some();
            ((), changed)
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_entries(|entries| (entries.keys().cloned().collect(), false)).await
    }
}
