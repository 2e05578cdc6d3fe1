//! Shared-store key layout

pub const DEFAULT_GEO_KEY: &str = "orbit:drivers:geo";

/// Hash field holding `AVAILABLE` / `BUSY`
pub const STATUS_FIELD: &str = "status";
/// Hash field holding the last claim time, epoch millis
pub const LAST_ASSIGNED_FIELD: &str = "lastAssignedAt";

/// Hash with the driver's status and last claim time
pub fn driver_state(driver_id: &str) -> String {
    format!("driver:state:{}", driver_id)
}

/// Heartbeat marker; expiry means the driver went quiet
pub fn driver_alive(driver_id: &str) -> String {
    format!("driver:alive:{}", driver_id)
}

/// Claim lock, held for the lock TTL
pub fn driver_lock(driver_id: &str) -> String {
    format!("lock:driver:{}", driver_id)
}

/// Replay marker for a client-supplied key
pub fn idempotency(key: &str) -> String {
    format!("idempotency:{}", key)
}
