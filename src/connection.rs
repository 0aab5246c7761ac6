//! Client connection handle.
//!
//! An [`OriginConnection`] keeps its origin active (and so immune to
//! eviction) until it is closed. Writes go through quota admission first.
//!
//! A connection belongs to the manager run it was opened in. After a
//! [`reset`](QuotaManager::reset) it is stale: writes fail with
//! [`QuotaError::StaleConnection`] and closing it is a no-op, even once the
//! manager is initialized again.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::QuotaError;
use crate::manager::QuotaManager;
use crate::origin::OriginKey;

/// Open client on an origin, obtained from [`QuotaManager::open`].
///
/// Prefer [`close`](Self::close); dropping an unclosed connection releases it
/// on a background task when a tokio runtime is available.
pub struct OriginConnection {
    manager: Arc<QuotaManager>,
    origin: OriginKey,
    generation: u64,
    closed: bool,
}

impl OriginConnection {
    pub(crate) fn new(manager: Arc<QuotaManager>, origin: OriginKey, generation: u64) -> Self {
        Self {
            manager,
            origin,
            generation,
            closed: false,
        }
    }

    #[must_use]
    pub fn origin(&self) -> &OriginKey {
        &self.origin
    }

    /// Admit `data.len()` bytes, then write them through the storage client.
    ///
    /// If the backend write fails the reservation is rolled back.
    pub async fn write(&self, data: &[u8]) -> Result<(), QuotaError> {
        let len = data.len() as u64;
        self.manager
            .admit_connection_write(&self.origin, len, self.generation)
            .await?;

        if let Err(e) = self.manager.client.write(&self.origin, data).await {
            warn!(origin = %self.origin, bytes = len, error = %e, "Write failed - releasing reservation");
            if let Err(rollback) = self.manager.release_reservation(&self.origin, len, self.generation).await {
                warn!(origin = %self.origin, error = %rollback, "Failed to roll back reservation");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Release the connection. The last close on an origin stamps its access time.
    pub async fn close(mut self) -> Result<(), QuotaError> {
        self.closed = true;
        match self.manager.close_connection(&self.origin, self.generation).await {
            Ok(_) => Ok(()),
            // Manager was reset while the connection was open
            Err(QuotaError::StaleConnection(_) | QuotaError::NotInitialized | QuotaError::UnknownOrigin(_)) => {
                debug!(origin = %self.origin, "Closing connection after reset");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for OriginConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let origin = self.origin.clone();
        let generation = self.generation;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.close_connection(&origin, generation).await {
                        debug!(origin = %origin, error = %e, "Release on drop failed");
                    }
                });
            }
            Err(_) => warn!(origin = %self.origin, "Connection dropped outside a runtime - origin stays active"),
        }
    }
}

impl std::fmt::Debug for OriginConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginConnection")
            .field("origin", &self.origin)
            .field("generation", &self.generation)
            .field("closed", &self.closed)
            .finish()
    }
}
