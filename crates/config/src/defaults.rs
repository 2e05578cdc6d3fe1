pub fn default_service_name() -> String {
    "orbit".to_string()
}

// Server defaults
pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_http_port() -> u16 {
    3000
}

pub fn default_websocket_port() -> u16 {
    3001
}

// Store defaults
pub fn default_geo_key() -> String {
    "orbit:drivers:geo".to_string()
}

pub fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

// Matching defaults
pub fn default_initial_radius_m() -> u32 {
    3000
}

pub fn default_radius_step_m() -> u32 {
    2000
}

pub fn default_max_radius_m() -> u32 {
    10000
}

pub fn default_candidate_limit() -> usize {
    10
}

pub fn default_lock_ttl_ms() -> u64 {
    5000
}

pub fn default_idempotency_ttl_seconds() -> u64 {
    60
}

// Resilience defaults
pub fn default_failure_threshold() -> u32 {
    5
}

pub fn default_open_duration_ms() -> u64 {
    10_000
}

pub fn default_point_timeout_ms() -> u64 {
    200
}

pub fn default_search_timeout_ms() -> u64 {
    300
}

// Realtime defaults
pub fn default_heartbeat_interval_seconds() -> u64 {
    30
}

pub fn default_outbound_queue_capacity() -> usize {
    256
}

// Driver maintenance defaults
pub fn default_alive_ttl_seconds() -> u64 {
    30
}

pub fn default_cleanup_interval_seconds() -> u64 {
    60
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
