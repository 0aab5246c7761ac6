//! # Quota Engine
//!
//! Quota-governed temporary storage: per-origin usage accounting inside a
//! shared pool, a global and per-group byte quota, and liveness-gated LRU
//! eviction when a write would exceed it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Storage clients                           │
//! │  • OriginConnection::write() asks for admission first       │
//! │  • open/close drive origin liveness                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QuotaManager                            │
//! │  • Uninitialized → Initializing → Ready → ShuttingDown      │
//! │  • Group then global headroom check per admission           │
//! │  • Plans all evictions before deleting anything             │
//! └─────────────────────────────────────────────────────────────┘
//!            │                 │                    │
//!            ▼                 ▼                    ▼
//! ┌──────────────────┐ ┌────────────────┐ ┌──────────────────────┐
//! │   UsageLedger    │ │ ActivityTracker│ │      LruPolicy       │
//! │ records + totals │ │ open counts,   │ │ inactive, oldest     │
//! │ per group/global │ │ access stamps  │ │ first, all-or-nothing│
//! └──────────────────┘ └────────────────┘ └──────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StorageClient / UsageScanner / UsageCache (embedder)       │
//! │  • InMemoryStorage, MemoryUsageCache, SqliteUsageCache      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quota_engine::{QuotaManager, QuotaConfig, InMemoryStorage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(InMemoryStorage::new());
//!     let config = QuotaConfig {
//!         cache_path: Some("./quota_cache.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let manager = Arc::new(
//!         QuotaManager::new(config, storage.clone())
//!             .with_scanner(storage.clone())
//!             .with_configured_cache()
//!             .await
//!             .expect("cache"),
//!     );
//!
//!     manager.init().await.expect("init");
//!     manager.init_temporary_storage_from_disk(50 * 1024 * 1024 * 1024).await.expect("limit");
//!
//!     let origin = "https://app.example.com".into();
//!     manager.initialize_temporary_origin(&"example.com".into(), &origin, true).await.expect("origin");
//!
//!     let conn = manager.open(&origin).await.expect("open");
//!     match conn.write(b"hello").await {
//!         Err(e) if e.is_insufficient_space() => println!("quota exceeded"),
//!         other => other.expect("write"),
//!     }
//!     conn.close().await.expect("close");
//!
//!     manager.reset().await.expect("reset");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`manager`]: the [`QuotaManager`] state machine and admission path
//! - [`ledger`]: authoritative usage with O(1) running totals
//! - [`activity`]: open-connection counting and access-time stamping
//! - [`eviction`]: LRU victim selection
//! - [`storage`]: collaborator traits plus memory and SQLite implementations
//! - [`pressure`]: usage/limit classification

pub mod activity;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod eviction;
pub mod ledger;
pub mod manager;
pub mod metrics;
pub mod origin;
pub mod pressure;
pub mod storage;

pub use activity::{ActivityTracker, ReleaseOutcome};
pub use clock::{LogicalClock, Timestamp};
pub use config::QuotaConfig;
pub use connection::OriginConnection;
pub use error::QuotaError;
pub use eviction::{EvictionCandidate, EvictionPlan, EvictionRequest, LruPolicy, Shortfall};
pub use ledger::UsageLedger;
pub use manager::{EvictionReport, ManagerState, QuotaLimits, QuotaManager, UsageReport};
pub use metrics::LatencyTimer;
pub use origin::{GroupKey, OriginKey, OriginRecord, PersistedOrigin};
pub use pressure::QuotaPressure;
pub use storage::memory::{InMemoryStorage, MemoryUsageCache};
pub use storage::sqlite::SqliteUsageCache;
pub use storage::traits::{StorageClient, StorageError, UsageCache, UsageScanner};
