//! Liveness tracking for origins.
//!
//! An origin with at least one open client connection is active and immune to
//! eviction. The access time is stamped when the last client closes, marking
//! the end of a usage burst; opening a connection alone does not stamp it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{LogicalClock, Timestamp};
use crate::error::QuotaError;
use crate::ledger::UsageLedger;
use crate::origin::OriginKey;

/// Result of releasing a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other clients are still open
    StillActive,
    /// The last client closed; carries the new access time if stamping is on
    BecameInactive(Option<Timestamp>),
    /// There was no open client to release
    AlreadyInactive,
}

impl ReleaseOutcome {
    #[must_use]
    pub fn became_inactive(&self) -> bool {
        matches!(self, Self::BecameInactive(_))
    }
}

/// Reference-counts live connections on the ledger's records.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    clock: Arc<LogicalClock>,
    update_access_time: bool,
}

impl ActivityTracker {
    pub fn new(clock: Arc<LogicalClock>, update_access_time: bool) -> Self {
        Self {
            clock,
            update_access_time,
        }
    }

    /// Increment the active client count. Returns the new count.
    pub fn acquire(&self, ledger: &mut UsageLedger, origin_key: &OriginKey) -> Result<u32, QuotaError> {
        let record = ledger
            .get_mut(origin_key)
            .ok_or_else(|| QuotaError::UnknownOrigin(origin_key.clone()))?;
        record.active_client_count = record.active_client_count.saturating_add(1);
        debug!(origin = %origin_key, clients = record.active_client_count, "Client opened");
        Ok(record.active_client_count)
    }

    /// Decrement the active client count, stamping the access time when the
    /// last client closes.
    pub fn release(
        &self,
        ledger: &mut UsageLedger,
        origin_key: &OriginKey,
    ) -> Result<ReleaseOutcome, QuotaError> {
        let record = ledger
            .get_mut(origin_key)
            .ok_or_else(|| QuotaError::UnknownOrigin(origin_key.clone()))?;

        if record.active_client_count == 0 {
            warn!(origin = %origin_key, "Release on origin with no open clients");
            return Ok(ReleaseOutcome::AlreadyInactive);
        }

        record.active_client_count -= 1;
        if record.active_client_count > 0 {
            debug!(origin = %origin_key, clients = record.active_client_count, "Client closed");
            return Ok(ReleaseOutcome::StillActive);
        }

        let stamp = self.stamp();
        if let Some(ts) = stamp {
            record.last_access_time = ts;
        }
        debug!(origin = %origin_key, access_time = ?stamp, "Origin became inactive");
        Ok(ReleaseOutcome::BecameInactive(stamp))
    }

    #[must_use]
    pub fn is_active(&self, ledger: &UsageLedger, origin_key: &OriginKey) -> bool {
        ledger.get(origin_key).is_some_and(|r| r.is_active())
    }

    /// Next access time, or `None` when access-time updates are disabled.
    pub fn stamp(&self) -> Option<Timestamp> {
        self.update_access_time.then(|| self.clock.now())
    }
}
