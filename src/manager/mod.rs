// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quota manager coordinator.
//!
//! The [`QuotaManager`] is the façade storage clients call through. It ties
//! together:
//! - the [`UsageLedger`] (authoritative usage and running totals)
//! - the [`ActivityTracker`] (liveness, access-time stamping)
//! - the [`LruPolicy`] (victim selection)
//! - the external [`StorageClient`], [`UsageScanner`] and [`UsageCache`]
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized → Initializing → Ready → ShuttingDown → Uninitialized
//!      init()      init_temporary_storage()   reset()
//! ```
//!
//! # Concurrency
//!
//! Ledger, activity counters, limits and state sit behind a single async
//! mutex, so concurrent callers queue instead of racing on running totals.
//! Operations that delete data run on a spawned task owning the lock guard:
//! dropping the caller's future never abandons an eviction half-way.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use quota_engine::{QuotaManager, QuotaConfig, InMemoryStorage, ManagerState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let storage = Arc::new(InMemoryStorage::new());
//! let manager = Arc::new(QuotaManager::new(QuotaConfig::default(), storage.clone()));
//! assert_eq!(manager.state(), ManagerState::Uninitialized);
//!
//! manager.init().await.unwrap();
//! manager.init_temporary_storage(1024).await.unwrap();
//! assert_eq!(manager.state(), ManagerState::Ready);
//!
//! let origin = "https://a.example.com".into();
//! manager.initialize_temporary_origin(&"example.com".into(), &origin, true).await.unwrap();
//!
//! let conn = manager.open(&origin).await.unwrap();
//! conn.write(&[0u8; 512]).await.unwrap();
//! conn.close().await.unwrap();
//!
//! assert_eq!(manager.get_usage_for_principal(&origin).await.unwrap(), 512);
//! # }
//! ```

mod types;
mod api;
mod evict;
mod lifecycle;

pub use types::{EvictionReport, ManagerState, QuotaLimits, UsageReport};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::activity::ActivityTracker;
use crate::clock::LogicalClock;
use crate::config::QuotaConfig;
use crate::error::QuotaError;
use crate::eviction::LruPolicy;
use crate::ledger::UsageLedger;
use crate::origin::OriginKey;
use crate::storage::sqlite::SqliteUsageCache;
use crate::storage::traits::{StorageClient, UsageCache, UsageScanner};

/// State owned by the single logical coordinator.
pub(crate) struct Inner {
    pub(crate) state: ManagerState,
    pub(crate) state_tx: watch::Sender<ManagerState>,
    pub(crate) ledger: UsageLedger,
    pub(crate) activity: ActivityTracker,
    pub(crate) limits: Option<QuotaLimits>,
    pub(crate) policy: LruPolicy,
    pub(crate) client: Arc<dyn StorageClient>,
    /// Bumped by every reset. Connections remember the run they were opened in.
    pub(crate) generation: u64,
}

impl Inner {
    pub(crate) fn set_state(&mut self, state: ManagerState) {
        self.state = state;
        let _ = self.state_tx.send(state);
        crate::metrics::set_manager_state(&state.to_string());
    }

    /// Origins and writes are only accepted once a limit is in place.
    pub(crate) fn ensure_ready(&self) -> Result<QuotaLimits, QuotaError> {
        match (self.state, self.limits) {
            (ManagerState::Ready, Some(limits)) => Ok(limits),
            _ => Err(QuotaError::NotInitialized),
        }
    }

    /// Reads are allowed as soon as usage has been loaded.
    pub(crate) fn ensure_loaded(&self) -> Result<(), QuotaError> {
        match self.state {
            ManagerState::Initializing | ManagerState::Ready => Ok(()),
            _ => Err(QuotaError::NotInitialized),
        }
    }

    /// Connections from an earlier run must not touch the rebuilt ledger.
    pub(crate) fn ensure_generation(&self, generation: u64, origin: &OriginKey) -> Result<(), QuotaError> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(QuotaError::StaleConnection(origin.clone()))
        }
    }

    pub(crate) fn publish_usage(&self) {
        crate::metrics::set_usage_bytes(self.ledger.total_usage());
        crate::metrics::set_origin_count(self.ledger.len());
    }
}

/// Quota-governed temporary storage manager.
///
/// # Thread Safety
///
/// `QuotaManager` is `Send + Sync`; share it behind an `Arc`. Connections
/// returned by [`open`](Self::open) hold an `Arc` back to the manager.
pub struct QuotaManager {
    pub(super) config: QuotaConfig,
    pub(super) inner: Arc<Mutex<Inner>>,
    pub(super) state_rx: watch::Receiver<ManagerState>,
    pub(super) client: Arc<dyn StorageClient>,
    pub(super) scanner: Option<Arc<dyn UsageScanner>>,
    pub(super) cache: Option<Arc<dyn UsageCache>>,
    pub(super) clock: Arc<LogicalClock>,
}

impl QuotaManager {
    /// Create a manager in the `Uninitialized` state.
    ///
    /// Call [`init()`](Self::init) then
    /// [`init_temporary_storage()`](Self::init_temporary_storage) before use.
    pub fn new(config: QuotaConfig, client: Arc<dyn StorageClient>) -> Self {
        let (state_tx, state_rx) = watch::channel(ManagerState::Uninitialized);
        let clock = Arc::new(LogicalClock::new());
        let activity = ActivityTracker::new(Arc::clone(&clock), config.update_access_time);

        let inner = Inner {
            state: ManagerState::Uninitialized,
            state_tx,
            ledger: UsageLedger::new(),
            activity,
            limits: None,
            policy: LruPolicy::default(),
            client: Arc::clone(&client),
            generation: 0,
        };

        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            state_rx,
            client,
            scanner: None,
            cache: None,
            clock,
        }
    }

    /// Rebuild usage from this scanner when no valid cache is available.
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<dyn UsageScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Persist usage metadata across restarts.
    #[must_use]
    pub fn with_usage_cache(mut self, cache: Arc<dyn UsageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Open the SQLite usage cache at [`QuotaConfig::cache_path`], if one is set.
    ///
    /// An explicit [`with_usage_cache`](Self::with_usage_cache) wins over the
    /// configured path.
    pub async fn with_configured_cache(self) -> Result<Self, QuotaError> {
        if self.cache.is_some() {
            return Ok(self);
        }
        match self.config.cache_path.clone() {
            Some(path) => {
                let cache = SqliteUsageCache::new(&path).await?;
                Ok(self.with_usage_cache(Arc::new(cache)))
            }
            None => Ok(self),
        }
    }

    /// Replace the eviction policy (e.g. to evict zero-usage origins too).
    #[must_use]
    pub fn with_policy(mut self, policy: LruPolicy) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.get_mut().policy = policy;
        }
        self
    }

    /// Get current manager state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }

    /// Check if the manager accepts origins and writes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Run `op` on a spawned task holding the coordinator lock.
    ///
    /// The task runs to completion even if the returned future is dropped.
    pub(super) async fn run_exclusive<T, F, Fut>(&self, op: F) -> Result<T, QuotaError>
    where
        T: Send + 'static,
        F: FnOnce(tokio::sync::OwnedMutexGuard<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QuotaError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let guard = inner.lock_owned().await;
            op(guard).await
        });

        handle
            .await
            .map_err(|e| QuotaError::TaskFailed(e.to_string()))?
    }
}
