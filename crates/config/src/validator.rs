use crate::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("{field} must be a non-zero port")]
    InvalidPort { field: String },

    #[error("http_port and websocket_port must differ, both are {port}")]
    PortConflict { port: u16 },

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("Matching: {message}")]
    InvalidMatching { message: String },

    #[error("Store: {message}")]
    InvalidStore { message: String },

    #[error("Invalid log format '{0}'. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// No errors recorded; warnings do not count
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Note that `field` was absent and fell back to `value`
    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

/// Check a loaded configuration.
///
/// Collects every error and warning instead of stopping at the first, and
/// lists each field that fell back to its default. Callers decide what to
/// do with the report; startup refuses to continue when it is not valid.
///
/// # Example
///
/// ```
/// let config = config::OrbitConfig::default();
/// let report = config::validate_config(&config);
/// assert!(report.is_valid());
/// assert!(!report.defaults_applied.is_empty());
/// ```
pub fn validate_config(config: &OrbitConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    validate_listeners(&config.server, &mut report);
    validate_store(&config.store, &mut report);
    validate_matching(&config.matching, &mut report);
    validate_resilience(&config.resilience, &mut report);
    validate_runtime(config, &mut report);
    record_defaults(config, &mut report);

    report
}

/// Report every tunable the source document left to its default
fn record_defaults(config: &OrbitConfig, report: &mut ValidationReport) {
    let store_type = match config.store.store_type {
        StoreKind::Memory => "memory",
        StoreKind::Redis => "redis",
    };
    let defaults: [(&str, String); 24] = [
        ("service.name", config.service.name.clone()),
        ("service.environment", config.service.environment.to_string()),
        ("server.host", config.server.host.clone()),
        ("server.http_port", config.server.http_port.to_string()),
        ("server.websocket_port", config.server.websocket_port.to_string()),
        ("store.type", store_type.to_string()),
        ("store.geo_key", config.store.geo_key.clone()),
        ("matching.initial_radius_m", config.matching.initial_radius_m.to_string()),
        ("matching.radius_step_m", config.matching.radius_step_m.to_string()),
        ("matching.max_radius_m", config.matching.max_radius_m.to_string()),
        ("matching.candidate_limit", config.matching.candidate_limit.to_string()),
        ("matching.lock_ttl_ms", config.matching.lock_ttl_ms.to_string()),
        (
            "matching.idempotency_ttl_seconds",
            config.matching.idempotency_ttl_seconds.to_string(),
        ),
        ("resilience.failure_threshold", config.resilience.failure_threshold.to_string()),
        ("resilience.open_duration_ms", config.resilience.open_duration_ms.to_string()),
        ("resilience.point_timeout_ms", config.resilience.point_timeout_ms.to_string()),
        ("resilience.search_timeout_ms", config.resilience.search_timeout_ms.to_string()),
        (
            "realtime.heartbeat_interval_seconds",
            config.realtime.heartbeat_interval_seconds.to_string(),
        ),
        (
            "realtime.outbound_queue_capacity",
            config.realtime.outbound_queue_capacity.to_string(),
        ),
        ("drivers.alive_ttl_seconds", config.drivers.alive_ttl_seconds.to_string()),
        (
            "drivers.cleanup_interval_seconds",
            config.drivers.cleanup_interval_seconds.to_string(),
        ),
        ("logging.format", config.logging.format.clone()),
        ("metrics.enabled", config.metrics.enabled.to_string()),
        ("metrics.port", config.metrics.port.to_string()),
    ];

    for (field, value) in &defaults {
        if !config.is_provided(field) {
            report.add_default(field, value);
        }
    }

    if let (StoreKind::Redis, Some(redis)) = (config.store.store_type, &config.store.redis) {
        if redis.url.is_none() {
            for (field, value) in [
                ("store.redis.host", redis.host.clone()),
                ("store.redis.port", redis.port.to_string()),
                ("store.redis.db_index", redis.db_index.to_string()),
            ] {
                if !config.is_provided(field) {
                    report.add_default(field, &value);
                }
            }
        }
    }
}

fn validate_listeners(server: &ListenConfig, report: &mut ValidationReport) {
    if server.http_port == 0 {
        report.add_error(ValidationError::InvalidPort {
            field: "server.http_port".to_string(),
        });
    }
    if server.websocket_port == 0 {
        report.add_error(ValidationError::InvalidPort {
            field: "server.websocket_port".to_string(),
        });
    }
    if server.http_port != 0 && server.http_port == server.websocket_port {
        report.add_error(ValidationError::PortConflict {
            port: server.http_port,
        });
    }
}

fn validate_store(store: &StoreConfig, report: &mut ValidationReport) {
    if store.geo_key.is_empty() {
        report.add_error(ValidationError::InvalidStore {
            message: "geo_key must not be empty".to_string(),
        });
    }

    match (store.store_type, &store.redis) {
        (StoreKind::Redis, None) => {
            report.add_error(ValidationError::InvalidStore {
                message: "type is 'redis' but no redis section is configured".to_string(),
            });
        }
        (StoreKind::Redis, Some(redis)) => validate_redis(redis, report),
        (StoreKind::Memory, Some(_)) => {
            report.add_warning(
                "store.redis",
                "redis section is ignored while store.type is 'memory'",
            );
        }
        (StoreKind::Memory, None) => {
            report.add_warning(
                "store.type",
                "in-memory store does not coordinate across processes",
            );
        }
    }
}

fn validate_redis(redis: &RedisConfig, report: &mut ValidationReport) {
    match &redis.url {
        Some(raw) if substitution::has_unresolved_env_vars(raw) => {
            report.add_error(ValidationError::InvalidEnvVar {
                var: "store.redis.url".to_string(),
                message: format!("unresolved placeholder in '{}'", raw),
            });
        }
        Some(raw) => match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "redis" | "rediss") => {}
            Ok(parsed) => report.add_error(ValidationError::InvalidStore {
                message: format!("unsupported redis URL scheme '{}'", parsed.scheme()),
            }),
            Err(e) => report.add_error(ValidationError::InvalidStore {
                message: format!("invalid redis URL '{}': {}", raw, e),
            }),
        },
        None => {
            if redis.host.is_empty() {
                report.add_error(ValidationError::InvalidStore {
                    message: "redis.host must not be empty".to_string(),
                });
            }
            if redis.port == 0 {
                report.add_error(ValidationError::InvalidPort {
                    field: "store.redis.port".to_string(),
                });
            }
            if substitution::has_unresolved_env_vars(&redis.password) {
                report.add_error(ValidationError::InvalidEnvVar {
                    var: "store.redis.password".to_string(),
                    message: "unresolved placeholder".to_string(),
                });
            }
        }
    }
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    if matching.initial_radius_m == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.initial_radius_m".to_string(),
        });
    }
    if matching.radius_step_m == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.radius_step_m".to_string(),
        });
    }
    if matching.initial_radius_m > matching.max_radius_m {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "initial_radius_m ({}) exceeds max_radius_m ({})",
                matching.initial_radius_m, matching.max_radius_m
            ),
        });
    }
    if !(1..=100).contains(&matching.candidate_limit) {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "candidate_limit must be between 1 and 100, got {}",
                matching.candidate_limit
            ),
        });
    }
    if matching.lock_ttl_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.lock_ttl_ms".to_string(),
        });
    }
    if matching.idempotency_ttl_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.idempotency_ttl_seconds".to_string(),
        });
    }
}

fn validate_resilience(resilience: &ResilienceConfig, report: &mut ValidationReport) {
    let fields = [
        ("resilience.failure_threshold", resilience.failure_threshold as u64),
        ("resilience.open_duration_ms", resilience.open_duration_ms),
        ("resilience.point_timeout_ms", resilience.point_timeout_ms),
        ("resilience.search_timeout_ms", resilience.search_timeout_ms),
    ];
    for (field, value) in fields {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }
}

fn validate_runtime(config: &OrbitConfig, report: &mut ValidationReport) {
    if config.realtime.heartbeat_interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "realtime.heartbeat_interval_seconds".to_string(),
        });
    }
    if config.realtime.outbound_queue_capacity == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "realtime.outbound_queue_capacity".to_string(),
        });
    }
    if config.drivers.alive_ttl_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "drivers.alive_ttl_seconds".to_string(),
        });
    }
    if config.drivers.cleanup_interval_seconds == 0 {
        report.add_warning(
            "drivers.cleanup_interval_seconds",
            "dead-driver cleanup is disabled",
        );
    }

    let format = config.logging.format.as_str();
    if !matches!(format, "pretty" | "json" | "compact") {
        report.add_error(ValidationError::InvalidLogFormat(format.to_string()));
    }

    if config.metrics.enabled && config.metrics.port == 0 {
        report.add_error(ValidationError::InvalidPort {
            field: "metrics.port".to_string(),
        });
    }
    if config.metrics.enabled
        && (config.metrics.port == config.server.http_port
            || config.metrics.port == config.server.websocket_port)
    {
        report.add_error(ValidationError::PortConflict {
            port: config.metrics.port,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_config(&OrbitConfig::default());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "store.type"));
    }

    #[test]
    fn test_defaults_applied_for_omitted_fields() {
        let config = parse_config(
            r#"
service:
  name: "orbit-east"
matching:
  max_radius_m: 20000
store:
  type: "redis"
  redis:
    host: "cache.internal"
"#,
        )
        .expect("parse");

        let report = validate_config(&config);
        let applied = |field: &str| {
            report
                .defaults_applied
                .iter()
                .find(|d| d.field == field)
                .map(|d| d.value.clone())
        };

        assert_eq!(applied("matching.initial_radius_m").as_deref(), Some("3000"));
        assert_eq!(applied("server.http_port").as_deref(), Some("3000"));
        assert_eq!(applied("realtime.heartbeat_interval_seconds").as_deref(), Some("30"));
        assert_eq!(applied("store.redis.port").as_deref(), Some("6379"));
        assert_eq!(applied("service.name"), None);
        assert_eq!(applied("matching.max_radius_m"), None);
        assert_eq!(applied("store.type"), None);
        assert_eq!(applied("store.redis.host"), None);
    }

    #[test]
    fn test_fully_specified_document_reports_no_defaults() {
        let yaml = include_str!("../../../orbit.example.yaml");
        let report = validate_config(&parse_config(yaml).expect("parse"));
        let fields: Vec<_> = report.defaults_applied.iter().map(|d| d.field.as_str()).collect();
        assert!(fields.is_empty(), "unexpected defaults: {:?}", fields);
    }

    #[test]
    fn test_port_conflict() {
        let mut config = OrbitConfig::default();
        config.server.websocket_port = config.server.http_port;

        let report = validate_config(&config);
        assert!(report
            .errors
            .contains(&ValidationError::PortConflict { port: 3000 }));
    }

    #[test]
    fn test_radius_bounds() {
        let mut config = OrbitConfig::default();
        config.matching.initial_radius_m = 12_000;
        config.matching.radius_step_m = 0;
        config.matching.candidate_limit = 0;

        let report = validate_config(&config);
        assert_eq!(report.errors.len(), 3, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_redis_requires_section() {
        let mut config = OrbitConfig::default();
        config.store.store_type = StoreKind::Redis;
        assert!(!validate_config(&config).is_valid());

        config.store.redis = Some(RedisConfig {
            url: Some("http://not-redis:80".to_string()),
            ..RedisConfig::default()
        });
        let report = validate_config(&config);
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationError::InvalidStore { .. }]
        ));

        config.store.redis = Some(RedisConfig::default());
        assert!(validate_config(&config).is_valid());
    }

    #[test]
    fn test_unresolved_env_var_in_url() {
        let mut config = OrbitConfig::default();
        config.store.store_type = StoreKind::Redis;
        config.store.redis = Some(RedisConfig {
            url: Some("${ORBIT_UNSET_REDIS_URL}".to_string()),
            ..RedisConfig::default()
        });

        let report = validate_config(&config);
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationError::InvalidEnvVar { .. }]
        ));
    }

    #[test]
    fn test_zero_timeouts_and_log_format() {
        let mut config = OrbitConfig::default();
        config.resilience.point_timeout_ms = 0;
        config.resilience.search_timeout_ms = 0;
        config.logging.format = "xml".to_string();

        let report = validate_config(&config);
        assert_eq!(report.errors.len(), 3);
        assert!(report
            .errors
            .contains(&ValidationError::InvalidLogFormat("xml".to_string())));
    }
}
