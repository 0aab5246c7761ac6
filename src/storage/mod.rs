//! Storage collaborators of the quota engine.
//!
//! - [`traits`]: the [`StorageClient`](traits::StorageClient),
//!   [`UsageScanner`](traits::UsageScanner) and [`UsageCache`](traits::UsageCache) seams
//! - [`memory`]: DashMap-backed backend and in-memory cache
//! - [`sqlite`]: SQLite usage cache for fast, crash-aware restart

pub mod traits;
pub mod memory;
pub mod sqlite;
