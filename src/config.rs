//! Configuration for the quota engine.
//!
//! # Example
//!
//! ```
//! use quota_engine::QuotaConfig;
//!
//! // Minimal config (uses defaults)
//! let config = QuotaConfig::default();
//! assert!(config.update_access_time);
//! assert_eq!(config.fixed_limit_bytes, None);
//!
//! // Fixed quota for tests
//! let config = QuotaConfig {
//!     fixed_limit_bytes: Some(1024 * 1024),
//!     load_from_cache: false,
//!     ..Default::default()
//! };
//! assert_eq!(config.resolve_limit(u64::MAX, 0), 1024 * 1024);
//! ```

use serde::Deserialize;

/// Configuration for the quota manager.
///
/// Passed once at construction; there is no ambient global configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Fixed quota size in bytes. Overrides the disk-derived limit.
    #[serde(default)]
    pub fixed_limit_bytes: Option<u64>,

    /// Stamp access times on initialization and on last-client close.
    /// When disabled, eviction order falls back to registration order.
    #[serde(default = "default_update_access_time")]
    pub update_access_time: bool,

    /// Load usage from the persisted cache on `init()` instead of rescanning.
    #[serde(default = "default_load_from_cache")]
    pub load_from_cache: bool,

    /// Fraction of available disk (plus current usage) used as the dynamic limit
    #[serde(default = "default_disk_fraction")]
    pub disk_fraction: f64,

    /// Fraction of the global limit a single group may use
    #[serde(default = "default_group_limit_fraction")]
    pub group_limit_fraction: f64,

    /// Floor for the group limit (still capped at the global limit)
    #[serde(default = "default_min_group_limit_bytes")]
    pub min_group_limit_bytes: u64,

    /// SQLite path for the usage cache, opened by
    /// [`QuotaManager::with_configured_cache`](crate::QuotaManager::with_configured_cache)
    /// (None = no persisted cache)
    #[serde(default)]
    pub cache_path: Option<String>,
}

fn default_update_access_time() -> bool { true }
fn default_load_from_cache() -> bool { true }
fn default_disk_fraction() -> f64 { 0.5 }
fn default_group_limit_fraction() -> f64 { 0.2 }
fn default_min_group_limit_bytes() -> u64 { 10 * 1024 * 1024 } // 10 MB

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            fixed_limit_bytes: None,
            update_access_time: default_update_access_time(),
            load_from_cache: default_load_from_cache(),
            disk_fraction: default_disk_fraction(),
            group_limit_fraction: default_group_limit_fraction(),
            min_group_limit_bytes: default_min_group_limit_bytes(),
            cache_path: None,
        }
    }
}

impl QuotaConfig {
    /// Global limit: the fixed override if set, otherwise a fraction of the
    /// space that temporary storage could occupy (free disk plus current usage).
    #[must_use]
    pub fn resolve_limit(&self, available_disk_bytes: u64, current_usage: u64) -> u64 {
        if let Some(fixed) = self.fixed_limit_bytes {
            return fixed;
        }
        let pool = available_disk_bytes.saturating_add(current_usage) as f64;
        (pool * self.disk_fraction.clamp(0.0, 1.0)) as u64
    }

    /// Per-group limit derived from the global limit.
    #[must_use]
    pub fn group_limit(&self, global_limit: u64) -> u64 {
        let fractional = (global_limit as f64 * self.group_limit_fraction.clamp(0.0, 1.0)) as u64;
        fractional.max(self.min_group_limit_bytes).min(global_limit)
    }
}
