use crate::*;
use anyhow::{Context, Result};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<OrbitConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    parse_config(&content)
}

/// Parse a YAML document after environment variable substitution
pub fn parse_config(content: &str) -> Result<OrbitConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let document: Value = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;
    // An empty file is an empty mapping
    let document = match document {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    };

    let mut provided = BTreeSet::new();
    collect_paths(&document, "", &mut provided);

    let mut config: OrbitConfig = serde_yaml::from_value(document)
        .with_context(|| "Failed to parse YAML configuration")?;
    config.provided = provided;

    info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "Configuration loaded"
    );
    Ok(config)
}

/// Record the dotted path of every mapping key in `value`
fn collect_paths(value: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    let Value::Mapping(map) = value else {
        return;
    };
    for (key, child) in map {
        let Some(key) = key.as_str() else {
            continue;
        };
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        };
        collect_paths(child, &path, out);
        out.insert(path);
    }
}

#[instrument]
pub fn generate_default_config() -> OrbitConfig {
    OrbitConfig {
        store: StoreConfig {
            store_type: StoreKind::Redis,
            redis: Some(RedisConfig::default()),
            geo_key: default_geo_key(),
        },
        logging: LoggingConfig {
            format: "json".to_string(),
        },
        ..OrbitConfig::default()
    }
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &OrbitConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}
