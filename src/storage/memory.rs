use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{StorageClient, StorageError, UsageCache, UsageScanner};
use crate::clock::Timestamp;
use crate::origin::{GroupKey, OriginKey, PersistedOrigin};

#[derive(Debug, Clone)]
struct StoredOrigin {
    group: GroupKey,
    data: Vec<u8>,
    access_time: Option<Timestamp>,
    created_seq: u64,
}

/// In-memory storage backend.
///
/// Survives a [`QuotaManager::reset`](crate::QuotaManager::reset) (it plays the
/// role of the disk), so a restart can be rebuilt from it via [`UsageScanner`].
pub struct InMemoryStorage {
    data: DashMap<OriginKey, StoredOrigin>,
    failing_deletes: Mutex<HashSet<OriginKey>>,
    next_seq: Mutex<u64>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            failing_deletes: Mutex::new(HashSet::new()),
            next_seq: Mutex::new(0),
        }
    }

    /// Number of origins with storage
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn contains(&self, origin: &OriginKey) -> bool {
        self.data.contains_key(origin)
    }

    /// Bytes stored for an origin (0 if absent)
    #[must_use]
    pub fn stored_bytes(&self, origin: &OriginKey) -> u64 {
        self.data.get(origin).map_or(0, |o| o.data.len() as u64)
    }

    /// Total bytes across all origins
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.data.iter().map(|o| o.data.len() as u64).sum()
    }

    /// Persisted access time for an origin
    #[must_use]
    pub fn access_time(&self, origin: &OriginKey) -> Option<Timestamp> {
        self.data.get(origin).and_then(|o| o.access_time)
    }

    /// Make deletions of an origin fail until cleared.
    pub fn fail_deletes_for(&self, origin: &OriginKey, fail: bool) {
        let mut failing = self.failing_deletes.lock();
        if fail {
            failing.insert(origin.clone());
        } else {
            failing.remove(origin);
        }
    }

    /// Clear all stored data
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn create_origin(
        &self,
        origin: &OriginKey,
        group: &GroupKey,
        created_at: Timestamp,
    ) -> Result<(), StorageError> {
        let seq = {
            let mut next = self.next_seq.lock();
            let seq = *next;
            *next += 1;
            seq
        };
        self.data.entry(origin.clone()).or_insert_with(|| StoredOrigin {
            group: group.clone(),
            data: Vec::new(),
            access_time: Some(created_at),
            created_seq: seq,
        });
        Ok(())
    }

    async fn write(&self, origin: &OriginKey, data: &[u8]) -> Result<(), StorageError> {
        let mut stored = self
            .data
            .get_mut(origin)
            .ok_or_else(|| StorageError::NotFound(origin.to_string()))?;
        stored.data.extend_from_slice(data);
        Ok(())
    }

    async fn delete_origin_data(&self, origin: &OriginKey) -> Result<(), StorageError> {
        if self.failing_deletes.lock().contains(origin) {
            return Err(StorageError::Backend(format!("Failed to delete data for {origin}")));
        }
        self.data.remove(origin);
        Ok(())
    }

    async fn record_access_time(&self, origin: &OriginKey, at: Timestamp) -> Result<(), StorageError> {
        if let Some(mut stored) = self.data.get_mut(origin) {
            stored.access_time = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl UsageScanner for InMemoryStorage {
    async fn scan(&self) -> Result<Vec<PersistedOrigin>, StorageError> {
        let mut scanned: Vec<(u64, PersistedOrigin)> = self
            .data
            .iter()
            .map(|entry| {
                (
                    entry.created_seq,
                    PersistedOrigin {
                        origin_key: entry.key().clone(),
                        group_key: entry.group.clone(),
                        usage_bytes: entry.data.len() as u64,
                        last_access_time: entry.access_time,
                        registration_seq: None,
                    },
                )
            })
            .collect();
        scanned.sort_by_key(|(seq, _)| *seq);
        Ok(scanned.into_iter().map(|(_, origin)| origin).collect())
    }
}

/// In-memory [`UsageCache`], for tests and embedders without a database.
#[derive(Default)]
pub struct MemoryUsageCache {
    state: Mutex<(bool, Vec<PersistedOrigin>)>,
}

impl MemoryUsageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.lock().0
    }
}

#[async_trait]
impl UsageCache for MemoryUsageCache {
    async fn load(&self) -> Result<Option<Vec<PersistedOrigin>>, StorageError> {
        let state = self.state.lock();
        Ok(state.0.then(|| state.1.clone()))
    }

    async fn store(&self, records: &[PersistedOrigin]) -> Result<(), StorageError> {
        *self.state.lock() = (true, records.to_vec());
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), StorageError> {
        self.state.lock().0 = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> OriginKey {
        OriginKey::from(s)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStorage::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_create_write_and_delete() {
        let store = InMemoryStorage::new();
        store
            .create_origin(&origin("https://a.test"), &"a.test".into(), Timestamp::from_micros(1))
            .await
            .unwrap();
        store.write(&origin("https://a.test"), &[0u8; 64]).await.unwrap();
        assert_eq!(store.stored_bytes(&origin("https://a.test")), 64);

        store.delete_origin_data(&origin("https://a.test")).await.unwrap();
        assert!(!store.contains(&origin("https://a.test")));
    }

    #[tokio::test]
    async fn test_write_without_origin_fails() {
        let store = InMemoryStorage::new();
        let err = store.write(&origin("https://a.test"), b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = InMemoryStorage::new();
        assert!(store.delete_origin_data(&origin("https://nope.test")).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryStorage::new();
        let key = origin("https://a.test");
        store.create_origin(&key, &"a.test".into(), Timestamp::ZERO).await.unwrap();

        store.fail_deletes_for(&key, true);
        assert!(store.delete_origin_data(&key).await.is_err());
        assert!(store.contains(&key));

        store.fail_deletes_for(&key, false);
        store.delete_origin_data(&key).await.unwrap();
        assert!(!store.contains(&key));
    }

    #[tokio::test]
    async fn test_scan_reports_usage_and_access_time_in_creation_order() {
        let store = InMemoryStorage::new();
        store.create_origin(&origin("https://b.test"), &"b.test".into(), Timestamp::from_micros(5)).await.unwrap();
        store.create_origin(&origin("https://a.test"), &"a.test".into(), Timestamp::from_micros(6)).await.unwrap();
        store.write(&origin("https://a.test"), &[1u8; 10]).await.unwrap();
        store.record_access_time(&origin("https://b.test"), Timestamp::from_micros(9)).await.unwrap();

        let scanned = store.scan().await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].origin_key, origin("https://b.test"));
        assert_eq!(scanned[0].last_access_time, Some(Timestamp::from_micros(9)));
        assert_eq!(scanned[1].usage_bytes, 10);
        assert_eq!(scanned[1].group_key, GroupKey::from("a.test"));
    }

    #[tokio::test]
    async fn test_memory_cache_validity() {
        let cache = MemoryUsageCache::new();
        assert_eq!(cache.load().await.unwrap(), None);

        let records = vec![PersistedOrigin {
            origin_key: origin("https://a.test"),
            group_key: "a.test".into(),
            usage_bytes: 3,
            last_access_time: Some(Timestamp::from_micros(2)),
            registration_seq: Some(0),
        }];
        cache.store(&records).await.unwrap();
        assert!(cache.is_valid());
        assert_eq!(cache.load().await.unwrap(), Some(records));

        cache.invalidate().await.unwrap();
        assert_eq!(cache.load().await.unwrap(), None);
    }
}
