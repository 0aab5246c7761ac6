use thiserror::Error;

use crate::origin::{GroupKey, OriginKey};
use crate::storage::traits::StorageError;

/// Errors surfaced by the quota engine.
///
/// Every variant maps to a stable [`code`](QuotaError::code) so callers can
/// present a "disk full" condition distinctly from generic I/O failures.
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Quota manager is not initialized")]
    NotInitialized,

    #[error("Insufficient space for '{origin}': requested {requested} bytes, short by {shortfall}")]
    InsufficientSpace {
        origin: OriginKey,
        requested: u64,
        shortfall: u64,
    },

    #[error("Usage underflow for '{origin}': usage {usage}, delta {delta}")]
    UsageUnderflow {
        origin: OriginKey,
        usage: u64,
        delta: i64,
    },

    #[error("Unknown origin '{0}'")]
    UnknownOrigin(OriginKey),

    #[error("Origin '{origin}' belongs to group '{existing}', not '{requested}'")]
    GroupMismatch {
        origin: OriginKey,
        existing: GroupKey,
        requested: GroupKey,
    },

    #[error("Origin '{0}' has open connections")]
    OriginInUse(OriginKey),

    #[error("Connection to '{0}' was opened before the last reset")]
    StaleConnection(OriginKey),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Quota task failed: {0}")]
    TaskFailed(String),
}

impl QuotaError {
    /// Stable, platform-independent error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "quota.not_initialized",
            Self::InsufficientSpace { .. } => "quota.insufficient_space",
            Self::UsageUnderflow { .. } => "quota.usage_underflow",
            Self::UnknownOrigin(_) => "quota.unknown_origin",
            Self::GroupMismatch { .. } => "quota.group_mismatch",
            Self::OriginInUse(_) => "quota.origin_in_use",
            Self::StaleConnection(_) => "quota.stale_connection",
            Self::Storage(_) => "quota.storage",
            Self::TaskFailed(_) => "quota.task_failed",
        }
    }

    #[must_use]
    pub fn is_insufficient_space(&self) -> bool {
        matches!(self, Self::InsufficientSpace { .. })
    }
}
