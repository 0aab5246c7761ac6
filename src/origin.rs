//! Origin identity and per-origin accounting record.
//!
//! An [`OriginKey`] names a storage-isolation boundary (scheme, host, port and
//! attributes, already serialized by the caller). A [`GroupKey`] names the
//! coarser group (e.g. the registrable domain) the origin is accounted under.
//!
//! # Example
//!
//! ```
//! use quota_engine::{OriginKey, GroupKey, OriginRecord};
//!
//! let record = OriginRecord::new(
//!     OriginKey::from("https://a.example.com"),
//!     GroupKey::from("example.com"),
//!     1,
//! );
//! assert_eq!(record.usage_bytes, 0);
//! assert!(!record.is_active());
//! ```

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Stable origin identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginKey(String);

impl OriginKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OriginKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OriginKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for OriginKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group identifier (usually the base domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GroupKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for GroupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Usage and liveness state of a single origin.
///
/// Owned exclusively by the [`UsageLedger`](crate::ledger::UsageLedger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRecord {
    pub origin_key: OriginKey,
    pub group_key: GroupKey,
    /// Bytes attributed to this origin across all of its clients
    pub usage_bytes: u64,
    /// Last access stamp (registration, or last client closing)
    pub last_access_time: Timestamp,
    /// Registration order, used to break access-time ties
    pub registration_seq: u64,
    /// Open client connections; non-zero means the origin is not evictable
    pub active_client_count: u32,
    /// Whether the backend holds storage for this origin
    pub on_disk: bool,
    /// Whether the origin was initialized since the last `init()`. Not persisted.
    pub accessed_this_run: bool,
}

impl OriginRecord {
    pub fn new(origin_key: OriginKey, group_key: GroupKey, registration_seq: u64) -> Self {
        Self {
            origin_key,
            group_key,
            usage_bytes: 0,
            last_access_time: Timestamp::ZERO,
            registration_seq,
            active_client_count: 0,
            on_disk: false,
            accessed_this_run: false,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active_client_count > 0
    }
}

/// Origin state as stored in a usage cache or reported by a storage scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOrigin {
    pub origin_key: OriginKey,
    pub group_key: GroupKey,
    pub usage_bytes: u64,
    /// `None` when the backend has no access-time metadata for the origin
    pub last_access_time: Option<Timestamp>,
    pub registration_seq: Option<u64>,
}

impl From<&OriginRecord> for PersistedOrigin {
    fn from(record: &OriginRecord) -> Self {
        Self {
            origin_key: record.origin_key.clone(),
            group_key: record.group_key.clone(),
            usage_bytes: record.usage_bytes,
            last_access_time: Some(record.last_access_time),
            registration_seq: Some(record.registration_seq),
        }
    }
}
