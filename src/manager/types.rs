//! Public types for the quota manager.

use crate::origin::OriginKey;
use crate::pressure::QuotaPressure;

/// Manager lifecycle state.
///
/// ```text
/// Uninitialized → Initializing → Ready → ShuttingDown → Uninitialized
/// ```
///
/// Use [`super::QuotaManager::state()`] to check the current state or
/// [`super::QuotaManager::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Created or reset; no usage loaded
    Uninitialized,
    /// Usage loaded by `init()`, no quota limit yet
    Initializing,
    /// Limit established; origins and writes accepted
    Ready,
    /// `reset()` in progress
    ShuttingDown,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Global and per-group byte ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub global_bytes: u64,
    pub group_bytes: u64,
}

/// Outcome of one or more eviction passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Bytes that had to be freed
    pub need: u64,
    /// Bytes actually reclaimed
    pub freed_bytes: u64,
    /// Evicted origins, in eviction order
    pub evicted: Vec<OriginKey>,
    /// Origins whose data could not be deleted (still tracked)
    pub failed: Vec<OriginKey>,
}

impl EvictionReport {
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.freed_bytes >= self.need
    }

    #[must_use]
    pub fn shortfall(&self) -> u64 {
        self.need.saturating_sub(self.freed_bytes)
    }

    pub fn merge(&mut self, other: EvictionReport) {
        self.need += other.need;
        self.freed_bytes += other.freed_bytes;
        self.evicted.extend(other.evicted);
        self.failed.extend(other.failed);
    }
}

/// Snapshot of quota state, suitable for diagnostics endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    pub state: ManagerState,
    pub total_usage: u64,
    pub limits: Option<QuotaLimits>,
    pub origins: usize,
    pub active_origins: usize,
    pub pressure: Option<QuotaPressure>,
}
