//! Request de-duplication
//!
//! A marker `idempotency:{key}` is created with set-if-absent on first
//! sight of a key and expires after the configured window. Store trouble
//! never blocks a request: every operation here degrades open.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::guarded::GuardedStore;
use crate::keys;

/// Rejects replays of a match request within the idempotency window
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: GuardedStore,
}

impl IdempotencyGuard {
    pub fn new(store: GuardedStore) -> Self {
        Self { store }
    }

    /// `DuplicateRequest` if `key` was seen within its window. Store
    /// failures and timeouts let the request through.
    pub async fn ensure_idempotent(&self, key: &str, ttl: Duration) -> Result<()> {
        match self
            .store
            .set_if_absent(&keys::idempotency(key), "1", Some(ttl))
            .await
        {
            Ok(true) => {
                debug!(key, ttl_s = ttl.as_secs(), "Idempotency marker created");
                Ok(())
            }
            Ok(false) => {
                warn!(key, "Duplicate request rejected");
                Err(DispatchError::DuplicateRequest {
                    key: key.to_string(),
                })
            }
            Err(e) => {
                warn!(key, error = %e, "Idempotency check failed, allowing request");
                Ok(())
            }
        }
    }

    /// Whether a marker exists. `false` when the store cannot answer.
    pub async fn check_idempotency(&self, key: &str) -> bool {
        match self.store.exists(&keys::idempotency(key)).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(key, error = %e, "Idempotency lookup failed");
                false
            }
        }
    }

    /// Drop the marker so the key may be used again. Best effort.
    pub async fn mark_request_complete(&self, key: &str) {
        if let Err(e) = self.store.del(&keys::idempotency(key)).await {
            warn!(key, error = %e, "Failed to clear idempotency marker");
        }
    }
}
