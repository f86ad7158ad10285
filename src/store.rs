//! Durable backing stores for the IP cache.
//!
//! The in-memory view in [`crate::cache`] is never the source of truth across
//! restarts; these stores are.

use crate::{cache::CacheRecord, errors::GeoError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn search(&self, ip: &str) -> Result<Option<CacheRecord>, GeoError>;

    async fn write(&self, record: &CacheRecord) -> Result<(), GeoError>;

    async fn clear(&self) -> Result<(), GeoError>;

    /// Drop records whose timestamp is older than `retention`. Returns how many went.
    async fn delete_expired(&self, retention: Duration) -> Result<usize, GeoError>;
}

fn expired(records: &mut HashMap<String, CacheRecord>, retention: Duration) -> usize {
    let cutoff = Utc::now() - ChronoDuration::seconds(retention.as_secs() as i64);
    let before = records.len();
    records.retain(|_, record| record.timestamp >= cutoff);
    before - records.len()
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn search(&self, ip: &str) -> Result<Option<CacheRecord>, GeoError> {
        Ok(self.records.read().await.get(ip).cloned())
    }

    async fn write(&self, record: &CacheRecord) -> Result<(), GeoError> {
        self.records
            .write()
            .await
            .insert(record.ip.clone(), record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), GeoError> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn delete_expired(&self, retention: Duration) -> Result<usize, GeoError> {
        Ok(expired(&mut *self.records.write().await, retention))
    }
}

/// Store kept as one JSON document on disk, rewritten after every change.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, GeoError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(GeoError::IoError(e)),
        };

        info!("Opened cache store {} ({} records)", path.display(), records.len());

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    async fn persist(&self, records: &HashMap<String, CacheRecord>) -> Result<(), GeoError> {
        let json = serde_json::to_vec_pretty(records)?;
        // write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} cache records to {}", records.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn search(&self, ip: &str) -> Result<Option<CacheRecord>, GeoError> {
        Ok(self.records.read().await.get(ip).cloned())
    }

    async fn write(&self, record: &CacheRecord) -> Result<(), GeoError> {
        let mut records = self.records.write().await;
        records.insert(record.ip.clone(), record.clone());
        self.persist(&records).await
    }

    async fn clear(&self) -> Result<(), GeoError> {
        let mut records = self.records.write().await;
        records.clear();
        self.persist(&records).await
    }

    async fn delete_expired(&self, retention: Duration) -> Result<usize, GeoError> {
        let mut records = self.records.write().await;
        let removed = expired(&mut records, retention);
        if removed > 0 {
            self.persist(&records).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Hook;
    use chrono::DateTime;
    use tokio_test::assert_ok;

    fn record(ip: &str, timestamp: DateTime<Utc>) -> CacheRecord {
        CacheRecord {
            ip: ip.to_string(),
            timestamp,
            hook: Hook::Public,
            asn: None,
            country_code: "US".to_string(),
            authenticated: false,
            fail_count: 0,
            request_count: 1,
            last_access: timestamp,
            view_count: 1,
            host: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_clear() {
        let store = MemoryStore::new();
        assert_ok!(store.write(&record("1.2.3.4", Utc::now())).await);

        let found = store.search("1.2.3.4").await.unwrap();
        assert_eq!(found.map(|r| r.country_code), Some("US".to_string()));
        assert!(store.search("5.6.7.8").await.unwrap().is_none());

        assert_ok!(store.clear().await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_recent_records() {
        let store = MemoryStore::new();
        store.write(&record("1.1.1.1", Utc::now())).await.unwrap();
        store
            .write(&record("2.2.2.2", Utc::now() - ChronoDuration::hours(3)))
            .await
            .unwrap();

        let removed = store.delete_expired(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.search("1.1.1.1").await.unwrap().is_some());
        assert!(store.search("2.2.2.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.write(&record("9.9.9.9", Utc::now())).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let found = reopened.search("9.9.9.9").await.unwrap().unwrap();
        assert_eq!(found.country_code, "US");

        reopened.clear().await.unwrap();
        let cleared = JsonFileStore::open(&path).await.unwrap();
        assert!(cleared.search("9.9.9.9").await.unwrap().is_none());
    }
}
