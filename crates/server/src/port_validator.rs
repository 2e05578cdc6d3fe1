//! Early port checks
//!
//! Checking before binding is racy: another process can take the port in
//! between. This gives the operator a readable error at startup; the real
//! bind stays authoritative.

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Check every configured port can be bound right now
pub async fn validate_ports_available(config: &ServerConfig) -> Result<()> {
    let ports = configured_ports(config);
    if ports.is_empty() {
        warn!("No ports configured for server");
        return Ok(());
    }

    for (protocol, port) in ports {
        validate_single_port(&config.host, port, protocol).await?;
    }

    info!("All server ports validated successfully");
    Ok(())
}

fn configured_ports(config: &ServerConfig) -> Vec<(&'static str, u16)> {
    let mut ports = Vec::new();
    if let Some(port) = config.http_port {
        ports.push(("HTTP", port));
    }
    if let Some(port) = config.websocket_port {
        ports.push(("WebSocket", port));
    }
    ports
}

async fn validate_single_port(host: &str, port: u16, protocol: &str) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    debug!("Checking {} port {}", protocol, port);

    match TcpListener::bind(&addr).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => {
            error!("{} port {} is NOT available: {}", protocol, port, e);
            Err(ServerError::port_in_use(port, e.to_string()))
        }
    }
}

/// Whether binding `host:port` fails right now
pub async fn is_port_in_use(host: &str, port: u16) -> bool {
    TcpListener::bind(format!("{}:{}", host, port)).await.is_err()
}

/// Reject port 0 and duplicate ports; warn on privileged ports
pub fn validate_config_ports(config: &ServerConfig) -> Result<()> {
    let ports = configured_ports(config);
    for (protocol, port) in &ports {
        if *port == 0 {
            return Err(ServerError::ConfigError(format!(
                "{} port cannot be 0",
                protocol
            )));
        }
        if *port < 1024 {
            warn!("Port {} is a privileged port", port);
        }
    }
    if let [(_, a), (_, b)] = ports.as_slice() {
        if a == b {
            return Err(ServerError::ConfigError(format!(
                "HTTP and WebSocket cannot share port {}",
                a
            )));
        }
    }
    Ok(())
}
