//! Persistent key-addressed storage for raw upstream payloads

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::Keyspace;
use serde::{Deserialize, Serialize};
use tokio::task;

/// A persisted payload and the instant it was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub refreshed_at: DateTime<Utc>,
    pub body: String,
}

impl StoredBlob {
    #[must_use]
    pub fn new(refreshed_at: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            refreshed_at,
            body: body.into(),
        }
    }
}

/// Storage backing the catalog cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Refresh instant of a key without decoding its body
    async fn refreshed_at(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn read(&self, key: &str) -> Result<Option<StoredBlob>>;

    /// Atomically replace whatever is stored under `key`
    async fn replace(&self, key: &str, blob: StoredBlob) -> Result<()>;
}

// refreshed_at must stay the first field, see `FjallStore::refreshed_at`
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    refreshed_at: i64, // Unix timestamp (milliseconds)
    body: String,
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(anyhow!("Stored timestamp out of range: {millis}"))
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|v| v.to_vec()))
}

/// On-disk store backed by a fjall keyspace
pub struct FjallStore {
    store: Keyspace,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = fjall::Database::builder(&path).open()?;
        let items = db.keyspace("aemet", fjall::KeyspaceCreateOptions::default)?;
        Ok(FjallStore { store: items })
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();
        task::spawn_blocking(move || get_from_store(store, key_bytes)).await?
    }
}

#[async_trait]
impl CacheStore for FjallStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.load(key).await?.is_some())
    }

    #[tracing::instrument(name = "cache_timestamp", level = "debug", skip(self))]
    async fn refreshed_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(bytes) = self.load(key).await? else {
            tracing::debug!("Key not found");
            return Ok(None);
        };
        let (millis, _) = postcard::take_from_bytes::<i64>(&bytes)?;
        Ok(Some(timestamp(millis)?))
    }

    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    async fn read(&self, key: &str) -> Result<Option<StoredBlob>> {
        let Some(bytes) = self.load(key).await? else {
            tracing::debug!("Key not found");
            return Ok(None);
        };
        let entry: StoredEntry = postcard::from_bytes(&bytes)?;
        tracing::debug!("Key found, {} bytes", entry.body.len());
        Ok(Some(StoredBlob {
            refreshed_at: timestamp(entry.refreshed_at)?,
            body: entry.body,
        }))
    }

    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, blob))]
    async fn replace(&self, key: &str, blob: StoredBlob) -> Result<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let entry = StoredEntry {
            refreshed_at: blob.refreshed_at.timestamp_millis(),
            body: blob.body,
        };
        let bytes = postcard::to_stdvec(&entry)?;

        task::spawn_blocking(move || store.insert(key, bytes)).await??;
        Ok(())
    }
}

/// Volatile store for tests and disk-less hosts
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, StoredBlob>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_entries(|entries| entries.contains_key(key))
    }

    async fn refreshed_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_entries(|entries| entries.get(key).map(|blob| blob.refreshed_at))
    }

    async fn read(&self, key: &str) -> Result<Option<StoredBlob>> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    async fn replace(&self, key: &str, blob: StoredBlob) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), blob);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    async fn exercise(store: &dyn CacheStore) {
        assert!(!store.exists("catalog/station").await.unwrap());
        assert!(store.read("catalog/station").await.unwrap().is_none());
        assert!(store.refreshed_at("catalog/station").await.unwrap().is_none());

        store
            .replace("catalog/station", StoredBlob::new(at(8), "[]"))
            .await
            .unwrap();
        assert!(store.exists("catalog/station").await.unwrap());
        assert_eq!(store.refreshed_at("catalog/station").await.unwrap(), Some(at(8)));

        store
            .replace("catalog/station", StoredBlob::new(at(9), "[{\"idema\":\"3195\"}]"))
            .await
            .unwrap();
        let blob = store.read("catalog/station").await.unwrap().unwrap();
        assert_eq!(blob.refreshed_at, at(9));
        assert_eq!(blob.body, "[{\"idema\":\"3195\"}]");
    }

    #[tokio::test]
    async fn test_fjall_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[test]
    fn test_timestamp_header_decodes_without_body() {
        let entry = StoredEntry {
            refreshed_at: at(7).timestamp_millis(),
            body: "x".repeat(1024),
        };
        let bytes = postcard::to_stdvec(&entry).unwrap();
        let (millis, rest) = postcard::take_from_bytes::<i64>(&bytes).unwrap();
        assert_eq!(timestamp(millis).unwrap(), at(7));
        assert!(rest.len() > 1024);
    }
}
