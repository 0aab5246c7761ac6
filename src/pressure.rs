// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quota pressure classification for observability.
//!
//! Pressure is the ratio of tracked usage to the global limit. It does not
//! gate admission (the ledger does), but tells embedders how close the pool
//! is to forcing evictions.
//!
//! # Example
//!
//! ```
//! use quota_engine::QuotaPressure;
//!
//! let level = QuotaPressure::from_usage(500, 1000);
//! assert_eq!(level, QuotaPressure::Normal);
//!
//! let level = QuotaPressure::from_usage(950, 1000);
//! assert_eq!(level, QuotaPressure::Critical);
//! assert!(level.evictions_likely());
//! ```

/// Quota pressure level.
///
/// - **Normal** (< 70%): plenty of headroom
/// - **Warn** (70-90%): writes may soon require eviction
/// - **Critical** (90-100%): most writes evict something
/// - **Full** (>= 100%): every write evicts or fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuotaPressure {
    Normal = 0,
    Warn = 1,
    Critical = 2,
    Full = 3,
}

impl QuotaPressure {
    /// Classify a usage/limit ratio (0.0 → 1.0+)
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        match ratio {
            r if r < 0.70 => Self::Normal,
            r if r < 0.90 => Self::Warn,
            r if r < 1.0 => Self::Critical,
            _ => Self::Full,
        }
    }

    /// Classify usage against a limit. A zero limit is always full.
    #[must_use]
    pub fn from_usage(usage: u64, limit: u64) -> Self {
        if limit == 0 {
            return Self::Full;
        }
        Self::from_ratio(usage as f64 / limit as f64)
    }

    #[must_use]
    pub fn evictions_likely(&self) -> bool {
        matches!(self, Self::Critical | Self::Full)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - quota filling up",
            Self::Critical => "Critical - writes are evicting origins",
            Self::Full => "Full - quota exhausted",
        }
    }
}

impl std::fmt::Display for QuotaPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
