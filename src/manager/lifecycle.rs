//! Manager lifecycle: loading usage, establishing the limit, reset.
//!
//! Startup flow:
//! 1. `init()` loads records from the usage cache when it is enabled and
//!    valid, otherwise rebuilds them with the `UsageScanner`. The cache is
//!    then marked invalid so a crash forces a rescan next time.
//! 2. `init_temporary_storage()` sets the limit, evicts down to it and opens
//!    the manager for origins and writes.
//! 3. `reset()` stores the ledger back into the cache (valid again) and drops
//!    all in-memory state. On-disk data is left alone.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::QuotaError;
use crate::ledger::UsageLedger;
use crate::origin::PersistedOrigin;

use super::{EvictionReport, ManagerState, QuotaLimits, QuotaManager};

impl QuotaManager {
    /// Load persisted usage. Idempotent once loaded.
    #[tracing::instrument(skip(self), fields(source))]
    pub async fn init(&self) -> Result<(), QuotaError> {
        let startup_start = Instant::now();
        let mut inner = self.inner.lock().await;

        match inner.state {
            ManagerState::Initializing | ManagerState::Ready => {
                debug!(state = %inner.state, "Already initialized");
                return Ok(());
            }
            ManagerState::ShuttingDown => return Err(QuotaError::NotInitialized),
            ManagerState::Uninitialized => {}
        }

        info!("Loading temporary storage usage...");

        // ========== PHASE 1: Usage cache ==========
        let phase_start = Instant::now();
        let mut records: Option<Vec<PersistedOrigin>> = None;
        if self.config.load_from_cache {
            if let Some(cache) = &self.cache {
                match cache.load().await {
                    Ok(Some(loaded)) => {
                        info!(origins = loaded.len(), "Usage cache is valid - skipping scan");
                        tracing::Span::current().record("source", "cache");
                        records = Some(loaded);
                    }
                    Ok(None) => info!("Usage cache invalid or empty - rescanning storage"),
                    Err(e) => warn!(error = %e, "Failed to load usage cache - rescanning storage"),
                }
            }
        }
        crate::metrics::record_startup_phase("cache_load", phase_start.elapsed());

        // ========== PHASE 2: Storage scan ==========
        let records = match records {
            Some(records) => records,
            None => {
                let phase_start = Instant::now();
                let scanned = match &self.scanner {
                    Some(scanner) => scanner.scan().await.inspect_err(|e| {
                        crate::metrics::record_operation("init", "error");
                        warn!(error = %e, "Storage scan failed");
                    })?,
                    None => {
                        debug!("No usage scanner configured - starting empty");
                        Vec::new()
                    }
                };
                tracing::Span::current().record("source", "scan");
                crate::metrics::record_startup_phase("scan", phase_start.elapsed());
                scanned
            }
        };

        // ========== PHASE 3: Rebuild ledger ==========
        inner.ledger.clear();
        for record in records {
            if let Some(ts) = record.last_access_time {
                self.clock.observe(ts);
            }
            inner.ledger.restore(record);
        }

        // Until reset() stores a fresh snapshot the cache no longer matches disk
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate().await {
                warn!(error = %e, "Failed to invalidate usage cache");
            }
        }

        inner.set_state(ManagerState::Initializing);
        inner.publish_usage();
        crate::metrics::record_operation("init", "success");
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            origins = inner.ledger.len(),
            usage = inner.ledger.total_usage(),
            "Temporary storage usage loaded"
        );
        Ok(())
    }

    /// Establish (or resize) the global limit and move to `Ready`.
    ///
    /// Evicts inactive origins, oldest first, until usage fits the new limit.
    /// Active origins are never evicted, so usage can remain above the limit.
    #[tracing::instrument(skip(self))]
    pub async fn init_temporary_storage(&self, limit_bytes: u64) -> Result<EvictionReport, QuotaError> {
        self.establish_limit(move |_| limit_bytes).await
    }

    /// Like [`init_temporary_storage`](Self::init_temporary_storage), with the
    /// limit derived from configuration and the free disk space.
    #[tracing::instrument(skip(self))]
    pub async fn init_temporary_storage_from_disk(
        &self,
        available_disk_bytes: u64,
    ) -> Result<EvictionReport, QuotaError> {
        let config = self.config.clone();
        self.establish_limit(move |ledger| config.resolve_limit(available_disk_bytes, ledger.total_usage()))
            .await
    }

    async fn establish_limit<F>(&self, resolve: F) -> Result<EvictionReport, QuotaError>
    where
        F: FnOnce(&UsageLedger) -> u64 + Send + 'static,
    {
        let _timer = crate::metrics::LatencyTimer::new("init_storage");
        let config = self.config.clone();

        let result = self
            .run_exclusive(move |mut inner| async move {
                if !matches!(inner.state, ManagerState::Initializing | ManagerState::Ready) {
                    return Err(QuotaError::NotInitialized);
                }

                let global_bytes = resolve(&inner.ledger);
                let limits = QuotaLimits {
                    global_bytes,
                    group_bytes: config.group_limit(global_bytes),
                };
                let previous = inner.limits.replace(limits);
                crate::metrics::set_limit_bytes(global_bytes);
                info!(
                    limit = limits.global_bytes,
                    group_limit = limits.group_bytes,
                    previous = ?previous.map(|l| l.global_bytes),
                    usage = inner.ledger.total_usage(),
                    "Quota limit established"
                );

                let report = inner.enforce_limits().await;
                if !report.evicted.is_empty() {
                    info!(
                        evicted = report.evicted.len(),
                        freed = report.freed_bytes,
                        "Evicted origins to fit quota"
                    );
                }

                inner.set_state(ManagerState::Ready);
                Ok(report)
            })
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation("init_storage", status);
        result
    }

    /// Persist usage metadata and drop all in-memory state.
    ///
    /// On-disk origin data is kept; the next `init()` picks it up from the
    /// cache. Connections still open become stale: closing them is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) -> Result<(), QuotaError> {
        let cache = self.cache.clone();

        self.run_exclusive(move |mut inner| async move {
            if matches!(inner.state, ManagerState::Uninitialized | ManagerState::ShuttingDown) {
                return Ok(());
            }

            info!("Resetting quota manager...");
            inner.set_state(ManagerState::ShuttingDown);

            let active = inner.ledger.active_origins();
            if active > 0 {
                warn!(active, "Resetting with open connections - they become stale");
            }

            if let Some(cache) = cache {
                let snapshot = inner.ledger.snapshot();
                match cache.store(&snapshot).await {
                    Ok(()) => debug!(origins = snapshot.len(), "Usage cache stored"),
                    Err(e) => warn!(error = %e, "Failed to store usage cache - next init will rescan"),
                }
            }

            inner.ledger.clear();
            inner.limits = None;
            inner.generation += 1;
            inner.publish_usage();
            inner.set_state(ManagerState::Uninitialized);
            crate::metrics::record_operation("reset", "success");
            info!("Quota manager reset");
            Ok(())
        })
        .await
    }
}
