//! Lease release on graceful shutdown
//!
//! An outgoing leader that tombstones the record lets a successor acquire
//! on its next poll instead of waiting out the natural expiry.

use crate::election::config::LeaseLock;
use crate::election::store::{LeaseStore, StoreError};
use tracing::{info, warn};

/// Handle the host invokes during process shutdown.
///
/// Clears the shared record iff this candidate is still the holder.
/// Idempotent: releasing twice, or without ever having led, is a no-op.
#[derive(Clone)]
pub struct TerminationHook<S> {
    store: S,
    lock: LeaseLock,
}

impl<S: LeaseStore> TerminationHook<S> {
    pub fn new(store: S, lock: LeaseLock) -> Self {
        Self { store, lock }
    }

    /// Tombstone the record if this candidate is still the holder.
    ///
    /// Failures are logged and swallowed: shutdown must not block on the
    /// API server.
    pub async fn release(&self) {
        match self.try_release().await {
            Ok(()) => {
                info!(
                    holder = %self.lock.identity,
                    lease = %self.lock.name,
                    "Lease handover hook completed"
                );
            }
            Err(e) => {
                warn!(
                    holder = %self.lock.identity,
                    lease = %self.lock.name,
                    error = %e,
                    "Failed to release lease on shutdown"
                );
            }
        }
    }

    async fn try_release(&self) -> Result<(), StoreError> {
        self.store
            .clear_if_holder(&self.lock.name, &self.lock.namespace, &self.lock.identity)
            .await
    }
}
