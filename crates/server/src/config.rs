//! Listener configuration for the HTTP and WebSocket servers

use crate::error::{Result, ServerError};
use std::net::SocketAddr;

/// Default port assignments
pub mod ports {
    /// Match API and health
    pub const HTTP: u16 = 3000;
    /// Geo-cell subscription channel
    pub const WEBSOCKET: u16 = 3001;
}

/// Bind configuration. Each port is optional so either listener can run alone.
///
/// ```
/// use server::config::ServerConfig;
///
/// let both = ServerConfig::new("0.0.0.0", 3000, 3001);
/// let ws = ServerConfig::websocket_only("127.0.0.1", 3001);
/// assert!(both.has_servers() && ws.http_port.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: Option<u16>,
    pub websocket_port: Option<u16>,
}

impl ServerConfig {
    /// Both listeners on `host`
    pub fn new(host: impl Into<String>, http: u16, ws: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(http),
            websocket_port: Some(ws),
        }
    }

    /// Match API only, no subscription channel
    pub fn http_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(port),
            websocket_port: None,
        }
    }

    /// Subscription channel only, no match API
    pub fn websocket_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: None,
            websocket_port: Some(port),
        }
    }

    /// Parsed HTTP bind address.
    ///
    /// `None` when no HTTP port is configured, `Some(Err)` when the host does
    /// not parse.
    pub fn http_addr(&self) -> Option<Result<SocketAddr>> {
        self.http_port.map(|p| self.parse_addr(p))
    }

    /// Parsed WebSocket bind address; same shape as [`ServerConfig::http_addr`]
    pub fn websocket_addr(&self) -> Option<Result<SocketAddr>> {
        self.websocket_port.map(|p| self.parse_addr(p))
    }

    /// At least one port is configured
    pub fn has_servers(&self) -> bool {
        self.http_port.is_some() || self.websocket_port.is_some()
    }

    fn parse_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, port)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", ports::HTTP, ports::WEBSOCKET)
    }
}
