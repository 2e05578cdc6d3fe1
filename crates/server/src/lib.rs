//! Server infrastructure for Orbit
//!
//! An axum HTTP listener and a tokio-tungstenite WebSocket listener behind
//! one lifecycle: every listener implements [`Server`], and shutdown flows
//! through `CancellationToken`s so cancelling the root stops everything.
//!
//! ```ignore
//! use server::{CombinedServer, HttpServer, ServerConfig, ServerExt, WebSocketServer};
//!
//! let config = ServerConfig::new("0.0.0.0", 3000, 3001);
//! let server = CombinedServer::new("orbit", config.clone())
//!     .with_http(HttpServer::new(config.clone(), router))
//!     .with_websocket(WebSocketServer::with_handler(config, handler));
//! server.run_until_signalled().await?;
//! ```
#![allow(clippy::result_large_err)]

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod port_validator;
pub mod shutdown;
pub mod traits;
pub mod websocket;

pub use config::{ports, ServerConfig};
pub use error::{Result, ServerError};
pub use health::{health_routes, DependencyStatus, HealthState};
pub use http::HttpServer;
pub use port_validator::{validate_config_ports, validate_ports_available};
pub use shutdown::{run_until_shutdown, shutdown_signal, ShutdownController};
pub use traits::{Server, ServerExt};
pub use websocket::{ConnectionHandle, ConnectionId, ConnectionPool, MessageHandler, WebSocketServer};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the HTTP and WebSocket listeners side by side.
///
/// If either exits on its own the other is cancelled too.
pub struct CombinedServer {
    name: String,
    config: ServerConfig,
    http_server: Option<HttpServer>,
    ws_server: Option<WebSocketServer>,
}

impl CombinedServer {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            http_server: None,
            ws_server: None,
        }
    }

    /// Add the HTTP listener
    pub fn with_http(mut self, server: HttpServer) -> Self {
        self.http_server = Some(server);
        self
    }

    /// Add the WebSocket listener
    pub fn with_websocket(mut self, server: WebSocketServer) -> Self {
        self.ws_server = Some(server);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Fail fast if a configured port cannot be bound.
    ///
    /// # Errors
    ///
    /// [`ServerError::PortInUse`] naming the first busy port.
    pub async fn validate_ports(&self) -> Result<()> {
        validate_ports_available(&self.config).await
    }
}

#[async_trait::async_trait]
impl Server for CombinedServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<std::net::SocketAddr> {
        self.http_server
            .as_ref()
            .and_then(|s| s.address())
            .or_else(|| self.ws_server.as_ref().and_then(|s| s.address()))
    }

    fn is_running(&self) -> bool {
        self.http_server.as_ref().is_some_and(|s| s.is_running())
            || self.ws_server.as_ref().is_some_and(|s| s.is_running())
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let mut handles: Vec<tokio::task::JoinHandle<Result<()>>> = Vec::new();

        if let Some(ref http) = self.http_server {
            let http = http.clone();
            let token = shutdown_token.child_token();
            handles.push(tokio::spawn(async move { http.run(token).await }));
        }

        if let Some(ref ws) = self.ws_server {
            let ws = ws.clone();
            let token = shutdown_token.child_token();
            handles.push(tokio::spawn(async move { ws.run(token).await }));
        }

        if handles.is_empty() {
            warn!(server = %self.name, "No servers configured to start");
            return Ok(());
        }

        info!(server = %self.name, listeners = handles.len(), "Server components started");

        tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received");
            }
            result = wait_for_first_completion(&mut handles) => {
                match result {
                    Some(Ok(Ok(()))) => warn!("A listener exited unexpectedly"),
                    Some(Ok(Err(e))) => error!(%e, "A listener exited with error"),
                    Some(Err(e)) => error!(%e, "A listener task panicked"),
                    None => {}
                }
                shutdown_token.cancel();
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles)).await {
            Ok(results) => {
                let errors: Vec<_> = results
                    .into_iter()
                    .filter_map(|r| match r {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(format!("Task panicked: {}", e)),
                    })
                    .collect();

                if !errors.is_empty() {
                    warn!(?errors, "Some listeners had errors during shutdown");
                }
            }
            Err(_) => warn!("Timed out waiting for listeners to shut down"),
        }

        info!(server = %self.name, "Shutdown complete");
        Ok(())
    }
}

async fn wait_for_first_completion(
    handles: &mut [tokio::task::JoinHandle<Result<()>>],
) -> Option<std::result::Result<Result<()>, tokio::task::JoinError>> {
    if handles.is_empty() {
        return None;
    }

    let (result, _index, _remaining) =
        futures::future::select_all(handles.iter_mut()).await;

    Some(result)
}
