use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Timestamp;
use crate::origin::{GroupKey, OriginKey, PersistedOrigin};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Origin not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Byte-storing backend that consumes quota.
///
/// The quota engine only calls into it to create origin storage, to delete an
/// evicted origin's data and to persist access-time metadata. Writes go through
/// [`OriginConnection`](crate::OriginConnection), which obtains admission first.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create (empty) storage for a newly registered origin.
    async fn create_origin(
        &self,
        origin: &OriginKey,
        group: &GroupKey,
        created_at: Timestamp,
    ) -> Result<(), StorageError>;

    /// Append bytes for an origin. Only called after write admission.
    async fn write(&self, origin: &OriginKey, data: &[u8]) -> Result<(), StorageError>;

    /// Delete everything stored for an origin. Called only by eviction and
    /// explicit clears.
    async fn delete_origin_data(&self, origin: &OriginKey) -> Result<(), StorageError>;

    /// Persist the origin's access time alongside its data.
    /// Default implementation keeps no access-time metadata.
    async fn record_access_time(&self, _origin: &OriginKey, _at: Timestamp) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Rebuilds usage by scanning existing per-origin storage.
///
/// Used by `init()` when no valid usage cache is available.
#[async_trait]
pub trait UsageScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<PersistedOrigin>, StorageError>;
}

/// Persisted usage metadata that lets `init()` skip a full scan.
///
/// The cache is only trusted after a clean shutdown: `init()` invalidates it
/// for the duration of the run, and `reset()` stores a fresh copy.
#[async_trait]
pub trait UsageCache: Send + Sync {
    /// Stored records, or `None` if the cache is missing or invalid.
    async fn load(&self) -> Result<Option<Vec<PersistedOrigin>>, StorageError>;

    /// Replace the stored records and mark the cache valid.
    async fn store(&self, records: &[PersistedOrigin]) -> Result<(), StorageError>;

    /// Mark the cache invalid without dropping its contents.
    async fn invalidate(&self) -> Result<(), StorageError>;
}
