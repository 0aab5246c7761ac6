//! Origin registration, write admission, usage queries and explicit clears.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::activity::ReleaseOutcome;
use crate::clock::Timestamp;
use crate::connection::OriginConnection;
use crate::error::QuotaError;
use crate::metrics::LatencyTimer;
use crate::origin::{GroupKey, OriginKey, OriginRecord};
use crate::pressure::QuotaPressure;

use super::{EvictionReport, QuotaManager, UsageReport};

impl QuotaManager {
    // ═══════════════════════════════════════════════════════════════════════════
    // Origins
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register an origin and stamp its access time on first touch this run.
    ///
    /// Returns `Ok(false)` when the origin is unknown and `create_if_missing`
    /// is off. Newly created origins get backend storage via
    /// [`StorageClient::create_origin`](crate::StorageClient::create_origin).
    #[tracing::instrument(skip(self, group, origin), fields(group = %group, origin = %origin))]
    pub async fn initialize_temporary_origin(
        &self,
        group: &GroupKey,
        origin: &OriginKey,
        create_if_missing: bool,
    ) -> Result<bool, QuotaError> {
        let group = group.clone();
        let origin = origin.clone();

        let result = self
            .run_exclusive(move |mut guard| async move {
                guard.ensure_ready()?;
                let inner = &mut *guard;

                let created = !inner.ledger.contains(&origin);
                if created && !create_if_missing {
                    debug!("Origin not found and creation not requested");
                    return Ok(false);
                }

                let record = inner.ledger.register(origin.clone(), group.clone())?;
                let first_touch = created || !record.accessed_this_run;
                let stamp = if first_touch { inner.activity.stamp() } else { None };
                if let Some(ts) = stamp {
                    record.last_access_time = ts;
                }
                record.accessed_this_run = true;

                if created {
                    let created_at = stamp.unwrap_or(Timestamp::ZERO);
                    if let Err(e) = inner.client.create_origin(&origin, &group, created_at).await {
                        warn!(error = %e, "Failed to create origin storage");
                        inner.ledger.remove(&origin);
                        return Err(e.into());
                    }
                    if let Some(record) = inner.ledger.get_mut(&origin) {
                        record.on_disk = true;
                    }
                    info!(access_time = ?stamp, "Origin created");
                } else if let Some(ts) = stamp {
                    if let Err(e) = inner.client.record_access_time(&origin, ts).await {
                        warn!(error = %e, "Failed to persist access time");
                    }
                }

                inner.publish_usage();
                Ok(true)
            })
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation("initialize_origin", status);
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Usage
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reserve `additional_bytes` for `origin`, evicting other inactive
    /// origins first if the group or global limit would be exceeded.
    ///
    /// Fails with [`QuotaError::InsufficientSpace`] and no side effects when
    /// the inactive origins cannot cover the excess. The eviction runs to
    /// completion even if this future is dropped.
    pub async fn request_write_admission(
        &self,
        origin: &OriginKey,
        additional_bytes: u64,
    ) -> Result<(), QuotaError> {
        self.admit_write(origin, additional_bytes, None).await
    }

    /// Admission on behalf of a connection opened in run `generation`.
    pub(crate) async fn admit_connection_write(
        &self,
        origin: &OriginKey,
        additional_bytes: u64,
        generation: u64,
    ) -> Result<(), QuotaError> {
        self.admit_write(origin, additional_bytes, Some(generation)).await
    }

    #[tracing::instrument(name = "request_write_admission", skip(self, origin, generation), fields(origin = %origin))]
    async fn admit_write(
        &self,
        origin: &OriginKey,
        additional_bytes: u64,
        generation: Option<u64>,
    ) -> Result<(), QuotaError> {
        let _timer = LatencyTimer::new("admission");
        let requester = origin.clone();

        let result = self
            .run_exclusive(move |mut inner| async move {
                if let Some(generation) = generation {
                    inner.ensure_generation(generation, &requester)?;
                }
                inner.admit(&requester, additional_bytes).await
            })
            .await;

        match &result {
            Ok(()) => crate::metrics::record_operation("admission", "success"),
            Err(e) if e.is_insufficient_space() => {
                debug!(error = %e, "Write admission rejected");
                crate::metrics::record_operation("admission", "rejected");
            }
            Err(e) => {
                warn!(error = %e, "Write admission failed");
                crate::metrics::record_operation("admission", "error");
            }
        }
        result
    }

    /// Apply a usage change reported by storage. Returns the new usage.
    ///
    /// This is bookkeeping for changes that already happened on disk (deleted
    /// data, a rolled-back write, growth the backend measured after the fact).
    /// Positive deltas are recorded as-is and are not admitted: they can push
    /// usage past the limit, and the next admission evicts to make up for it.
    /// Reserve space ahead of a write with
    /// [`request_write_admission`](Self::request_write_admission) instead.
    pub async fn record_usage_delta(&self, origin: &OriginKey, delta: i64) -> Result<u64, QuotaError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;
        let usage = inner.ledger.record_usage_delta(origin, delta)?;
        inner.publish_usage();
        Ok(usage)
    }

    /// Give back bytes reserved by a connection write that never reached disk.
    pub(crate) async fn release_reservation(
        &self,
        origin: &OriginKey,
        bytes: u64,
        generation: u64,
    ) -> Result<u64, QuotaError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_ready()?;
        inner.ensure_generation(generation, origin)?;
        let delta = i64::try_from(bytes).unwrap_or(i64::MAX);
        let usage = inner.ledger.record_usage_delta(origin, -delta)?;
        inner.publish_usage();
        Ok(usage)
    }

    /// Current usage of an origin; 0 for unknown origins.
    ///
    /// Pure read: does not touch the access time.
    pub async fn get_usage_for_principal(&self, origin: &OriginKey) -> Result<u64, QuotaError> {
        let inner = self.inner.lock().await;
        inner.ensure_loaded()?;
        Ok(inner.ledger.get(origin).map_or(0, |r| r.usage_bytes))
    }

    pub async fn get_usage_for_group(&self, group: &GroupKey) -> Result<u64, QuotaError> {
        let inner = self.inner.lock().await;
        inner.ensure_loaded()?;
        Ok(inner.ledger.group_usage(group))
    }

    /// Copy of an origin's record, if tracked.
    pub async fn origin_record(&self, origin: &OriginKey) -> Result<Option<OriginRecord>, QuotaError> {
        let inner = self.inner.lock().await;
        inner.ensure_loaded()?;
        Ok(inner.ledger.get(origin).cloned())
    }

    /// Snapshot of usage, limits and pressure.
    pub async fn usage_report(&self) -> UsageReport {
        let inner = self.inner.lock().await;
        let total_usage = inner.ledger.total_usage();
        UsageReport {
            state: inner.state,
            total_usage,
            limits: inner.limits,
            origins: inner.ledger.len(),
            active_origins: inner.ledger.active_origins(),
            pressure: inner
                .limits
                .map(|l| QuotaPressure::from_usage(total_usage, l.global_bytes)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Clearing
    // ═══════════════════════════════════════════════════════════════════════════

    /// Delete an origin's data and stop tracking it. Returns the freed bytes.
    #[tracing::instrument(skip(self, origin), fields(origin = %origin))]
    pub async fn clear_origin(&self, origin: &OriginKey) -> Result<u64, QuotaError> {
        let origin = origin.clone();

        self.run_exclusive(move |mut inner| async move {
            inner.ensure_loaded()?;
            match inner.ledger.get(&origin) {
                None => return Err(QuotaError::UnknownOrigin(origin)),
                Some(record) if record.is_active() => return Err(QuotaError::OriginInUse(origin)),
                Some(_) => {}
            }

            inner.client.delete_origin_data(&origin).await?;
            let freed = inner.ledger.remove(&origin).map_or(0, |r| r.usage_bytes);
            crate::metrics::record_eviction("clear", 1, freed);
            crate::metrics::record_operation("clear", "success");
            inner.publish_usage();
            info!(freed, "Origin cleared");
            Ok(freed)
        })
        .await
    }

    /// Delete every tracked origin. Refuses if any origin is active.
    ///
    /// Origins whose data cannot be deleted stay tracked and are listed in
    /// [`EvictionReport::failed`].
    #[tracing::instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<EvictionReport, QuotaError> {
        self.run_exclusive(move |mut inner| async move {
            inner.ensure_loaded()?;
            if let Some(active) = inner.ledger.records().find(|r| r.is_active()) {
                return Err(QuotaError::OriginInUse(active.origin_key.clone()));
            }

            let mut report = EvictionReport {
                need: inner.ledger.total_usage(),
                ..Default::default()
            };
            let keys: Vec<OriginKey> = inner.ledger.snapshot().into_iter().map(|p| p.origin_key).collect();

            for origin in keys {
                match inner.client.delete_origin_data(&origin).await {
                    Ok(()) => {
                        if let Some(removed) = inner.ledger.remove(&origin) {
                            report.freed_bytes += removed.usage_bytes;
                            report.evicted.push(removed.origin_key);
                        }
                    }
                    Err(e) => {
                        warn!(origin = %origin, error = %e, "Failed to clear origin data");
                        crate::metrics::record_eviction_failure("clear");
                        report.failed.push(origin);
                    }
                }
            }

            crate::metrics::record_eviction("clear", report.evicted.len(), report.freed_bytes);
            crate::metrics::record_operation("clear", "success");
            inner.publish_usage();
            info!(cleared = report.evicted.len(), failed = report.failed.len(), "Cleared all origins");
            Ok(report)
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Connections
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a client connection. The origin is immune to eviction until every
    /// connection on it is closed.
    pub async fn open(self: &Arc<Self>, origin: &OriginKey) -> Result<OriginConnection, QuotaError> {
        let mut guard = self.inner.lock().await;
        guard.ensure_ready()?;
        let inner = &mut *guard;
        inner.activity.acquire(&mut inner.ledger, origin)?;
        Ok(OriginConnection::new(Arc::clone(self), origin.clone(), inner.generation))
    }

    /// Release one connection, persisting the new access time if it was the last.
    ///
    /// Connections opened before a reset get [`QuotaError::StaleConnection`]
    /// and leave the rebuilt activity counters alone.
    pub(crate) async fn close_connection(
        &self,
        origin: &OriginKey,
        generation: u64,
    ) -> Result<ReleaseOutcome, QuotaError> {
        let outcome = {
            let mut guard = self.inner.lock().await;
            guard.ensure_generation(generation, origin)?;
            guard.ensure_loaded()?;
            let inner = &mut *guard;
            inner.activity.release(&mut inner.ledger, origin)?
        };

        if let ReleaseOutcome::BecameInactive(Some(ts)) = outcome {
            if let Err(e) = self.client.record_access_time(origin, ts).await {
                warn!(origin = %origin, error = %e, "Failed to persist access time");
            }
        }
        Ok(outcome)
    }
}
