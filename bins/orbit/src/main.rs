//! Orbit CLI and Server Binary
//!
//! Entry point for the dispatch service. Provides commands for
//! initializing, validating and seeding configuration and for starting
//! the HTTP matching API and the WebSocket location fan-out.

use anyhow::{Context, Result};
use cli::{Cli, Commands, LogFormatArg, ServiceMode};
use common::{DriverId, GeoPoint};
use config::{generate_default_config, load_config, save_config, validate_config, OrbitConfig};
use dispatch::api::{create_router, ApiState, StatsProvider};
use dispatch::{maintenance, seed, DriverLocator, MatchingEngine};
use observability::{init_logging, init_metrics, LogFormat};
use realtime::{connection_stats, LivenessMonitor, LocationSink, RealtimeHandler, SubscriptionRegistry};
use server::{
    health_routes, CombinedServer, ConnectionPool, DependencyStatus, HealthState, HttpServer,
    Server, ServerConfig, ShutdownController, WebSocketServer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            mode,
            config,
            http,
            ws,
            seed,
            log_format,
        } => start_service(mode, config, http, ws, seed, log_format).await,
        Commands::Validate { config } => {
            init_logging("orbit", LogFormat::Pretty)?;
            validate_command(config).await
        }
        Commands::Init { output, force } => {
            init_logging("orbit", LogFormat::Pretty)?;
            init_command(output, force).await
        }
        Commands::Seed { config } => {
            init_logging("orbit", LogFormat::Pretty)?;
            seed_command(config).await
        }
    }
}

fn log_format(config: &OrbitConfig, cli_override: Option<LogFormatArg>) -> LogFormat {
    let name = cli_override
        .map(|f| f.as_str().to_string())
        .unwrap_or_else(|| config.logging.format.clone());
    LogFormat::parse(&name).unwrap_or_default()
}

/// Log the validation report for `config`. Errors abort.
fn validate_loaded(config: &OrbitConfig) -> Result<()> {
    let report = validate_config(config);

    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.defaults_applied.is_empty() {
        debug!(
            count = report.defaults_applied.len(),
            "Configuration defaults applied"
        );
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start Orbit due to configuration errors");
    }
    Ok(())
}

fn load_validated<P: AsRef<Path>>(config_path: P) -> Result<OrbitConfig> {
    let config_path = config_path.as_ref();
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    validate_loaded(&config)?;
    Ok(config)
}

/// CLI port flags win over the file
fn apply_port_overrides(config: &mut OrbitConfig, http: Option<u16>, ws: Option<u16>) {
    if let Some(port) = http {
        config.server.http_port = port;
        config.provided.insert("server.http_port".to_string());
    }
    if let Some(port) = ws {
        config.server.websocket_port = port;
        config.provided.insert("server.websocket_port".to_string());
    }
}

async fn start_service<P: AsRef<Path>>(
    mode: ServiceMode,
    config_path: P,
    http_override: Option<u16>,
    ws_override: Option<u16>,
    seed_drivers: bool,
    log_format_override: Option<LogFormatArg>,
) -> Result<()> {
    let config_path = config_path.as_ref();
    let mut config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    apply_port_overrides(&mut config, http_override, ws_override);

    init_logging(&config.service.name, log_format(&config, log_format_override))?;
    validate_loaded(&config)?;

    info!(
        mode = mode.as_str(),
        environment = %config.service.environment,
        http_port = config.server.http_port,
        ws_port = config.server.websocket_port,
        store = ?config.store.store_type,
        "Starting Orbit"
    );

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let store = dispatch::store::create_store(&config.store)
        .await
        .context("Failed to connect to the driver store")?;
    let engine = Arc::new(MatchingEngine::from_config(store, &config));

    if seed_drivers {
        let count = seed::seed_demo_drivers(engine.store(), &config.store.geo_key)
            .await
            .context("Failed to seed demo drivers")?;
        info!(count, "Demo drivers seeded");
    }

    let shutdown = ShutdownController::with_signals();

    if config.drivers.cleanup_interval_seconds > 0 {
        maintenance::spawn_cleanup_task(
            engine.store().clone(),
            config.store.geo_key.clone(),
            Duration::from_secs(config.drivers.cleanup_interval_seconds),
            shutdown.child_token(),
        );
    }

    let server_config = match mode {
        ServiceMode::All => ServerConfig::new(
            config.server.host.clone(),
            config.server.http_port,
            config.server.websocket_port,
        ),
        ServiceMode::Dispatch => ServerConfig::http_only(config.server.host.clone(), config.server.http_port),
        ServiceMode::Realtime => {
            ServerConfig::websocket_only(config.server.host.clone(), config.server.websocket_port)
        }
    };

    let mut server = CombinedServer::new(config.service.name.clone(), server_config.clone());
    let liveness = LivenessMonitor::new(Duration::from_secs(config.realtime.heartbeat_interval_seconds));
    let mut pool: Option<ConnectionPool> = None;

    if mode.runs_websocket() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handler = RealtimeHandler::new(registry).with_location_sink(Arc::new(StoreLocationSink {
            locator: engine.locator().clone(),
        }));
        let ws = WebSocketServer::with_handler(server_config.clone(), Arc::new(handler))
            .with_outbound_capacity(config.realtime.outbound_queue_capacity);
        liveness.initialize(ws.pool());
        pool = Some(ws.pool());
        server = server.with_websocket(ws);
    }

    if mode.runs_http() {
        let health = Arc::new(HealthState::new(
            config.service.name.clone(),
            config.service.environment.as_str(),
        ));
        spawn_health_refresh(health.clone(), engine.clone(), shutdown.child_token());

        let mut api_state = ApiState::new(engine.clone());
        if let Some(pool) = pool.clone() {
            api_state = api_state.with_stats(Arc::new(ConnectionStatsSection { pool }));
        }
        let router = health_routes(health).merge(create_router(api_state));
        server = server.with_http(HttpServer::new(server_config, router));
    }

    server.validate_ports().await?;
    let result = server.run(shutdown.token()).await;

    liveness.stop();
    shutdown.shutdown();
    info!("Orbit stopped");
    result.map_err(Into::into)
}

/// Persists positions received over WebSocket without blocking the socket
struct StoreLocationSink {
    locator: DriverLocator,
}

impl LocationSink for StoreLocationSink {
    fn record(&self, driver_id: &DriverId, point: GeoPoint) {
        let locator = self.locator.clone();
        let driver_id = driver_id.clone();
        tokio::spawn(async move {
            if let Err(e) = locator.update_location(&driver_id, point).await {
                warn!(driver_id = %driver_id, error = %e, "Failed to persist driver location");
            }
        });
    }
}

struct ConnectionStatsSection {
    pool: ConnectionPool,
}

impl StatsProvider for ConnectionStatsSection {
    fn section(&self) -> &'static str {
        "connections"
    }

    fn stats(&self) -> serde_json::Value {
        serde_json::to_value(connection_stats(&self.pool)).unwrap_or(serde_json::Value::Null)
    }
}

/// Mirror breaker state into `/health/detailed`
fn spawn_health_refresh(
    health: Arc<HealthState>,
    engine: Arc<MatchingEngine>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for breaker in [engine.store_breaker(), engine.matching_breaker()] {
                        let stats = breaker.stats();
                        health.update_dependency(DependencyStatus {
                            name: breaker.name().to_string(),
                            healthy: !stats.is_open,
                            detail: stats
                                .open_until
                                .map(|until| format!("circuit open until {}", until.to_rfc3339())),
                        });
                    }
                    debug!("Health dependencies refreshed");
                }
            }
        }
    });
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {} ({})", config.service.name, config.service.environment);
    println!("Store: {:?}", config.store.store_type);
    println!(
        "Listeners: HTTP {}:{}, WebSocket {}:{}",
        config.server.host, config.server.http_port, config.server.host, config.server.websocket_port
    );
    println!(
        "Search radii: {} m to {} m in steps of {} m",
        config.matching.initial_radius_m, config.matching.max_radius_m, config.matching.radius_step_m
    );

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P, force: bool) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    if output_path.exists() && !force {
        anyhow::bail!(
            "{:?} already exists; pass --force to overwrite it",
            output_path
        );
    }

    let config = generate_default_config();

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Point store.redis at your Redis instance (or set store.type: memory)");
    println!(
        "  2. Run 'orbit validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  3. Run 'orbit start --config {:?} --seed' to start with demo drivers",
        output_path
    );

    Ok(())
}

async fn seed_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let config = load_validated(config_path)?;

    let store = dispatch::store::create_store(&config.store)
        .await
        .context("Failed to connect to the driver store")?;
    let engine = MatchingEngine::from_config(store, &config);

    let count = seed::seed_demo_drivers(engine.store(), &config.store.geo_key)
        .await
        .context("Failed to seed demo drivers")?;

    println!("[ok] Seeded {} demo drivers into {:?}", count, config.store.store_type);
    println!("Try a match near the cluster: lat 40.7423, lng -73.9745");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_are_validated() {
        let mut config = OrbitConfig::default();
        assert!(validate_loaded(&config).is_ok());

        apply_port_overrides(&mut config, Some(4100), None);
        assert_eq!(config.server.http_port, 4100);
        assert!(config.is_provided("server.http_port"));
        assert!(validate_loaded(&config).is_ok());

        // Moving the WebSocket port onto the HTTP port must be rejected
        apply_port_overrides(&mut config, None, Some(4100));
        assert!(validate_loaded(&config).is_err());
    }

    #[test]
    fn test_load_validated_rejects_invalid_file() {
        let dir = std::env::temp_dir().join(format!("orbit-main-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.yaml");
        std::fs::write(&good, "service:\n  name: orbit\n").unwrap();
        assert_eq!(load_validated(&good).unwrap().service.name, "orbit");

        let bad = dir.join("bad.yaml");
        std::fs::write(&bad, "matching:\n  candidate_limit: 0\n").unwrap();
        assert!(load_validated(&bad).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_log_format_precedence() {
        let mut config = OrbitConfig::default();
        config.logging.format = "json".to_string();
        assert_eq!(log_format(&config, None), LogFormat::Json);
        assert_eq!(log_format(&config, Some(LogFormatArg::Compact)), LogFormat::Compact);

        config.logging.format = "nonsense".to_string();
        assert_eq!(log_format(&config, None), LogFormat::Pretty);
    }
}
