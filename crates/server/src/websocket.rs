//! WebSocket listener built on tokio-tungstenite
//!
//! Every accepted socket gets a [`ConnectionHandle`]: a bounded outbound
//! queue drained by a dedicated writer task, a liveness flag flipped by pongs,
//! and a termination token. The handle is what the rest of the process
//! holds on to; the socket halves never leave this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::traits::Server;

pub type ConnectionId = u64;

/// Frames a connection may have queued before further sends are dropped
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Message>,
    open: AtomicBool,
    alive: AtomicBool,
    terminate: CancellationToken,
    topics: Mutex<HashSet<String>>,
}

/// Shared handle to one live WebSocket connection.
///
/// Cloning is cheap. Sends never block: frames are queued and written by
/// the connection's writer task in order. The queue is bounded; once a
/// slow reader has filled it, further frames are dropped until the writer
/// catches up.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue,
    /// holding at most [`DEFAULT_OUTBOUND_CAPACITY`] frames.
    pub fn new(id: ConnectionId, peer_addr: Option<SocketAddr>) -> (Self, mpsc::Receiver<Message>) {
        Self::with_capacity(id, peer_addr, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Create a handle whose outbound queue holds at most `capacity` frames.
    ///
    /// A capacity of zero is raised to one.
    pub fn with_capacity(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                connected_at: Utc::now(),
                outbound: tx,
                open: AtomicBool::new(true),
                alive: AtomicBool::new(true),
                terminate: CancellationToken::new(),
                topics: Mutex::new(HashSet::new()),
            }),
        };
        (handle, rx)
    }

    /// Server-assigned id, unique for the life of the process
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address, if known at accept time
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Open and still able to accept outbound frames
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire) && !self.inner.outbound.is_closed()
    }

    /// Queue a frame without waiting.
    ///
    /// Returns false if the connection is no longer open or its queue is
    /// full. A full queue drops the frame and counts it in
    /// `realtime_frames_dropped_total`.
    pub fn send(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.inner.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                observability::metrics::record_frame_dropped();
                debug!(conn_id = self.inner.id, "Outbound queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Frames queued and not yet handed to the socket
    pub fn queued(&self) -> usize {
        self.inner.outbound.max_capacity() - self.inner.outbound.capacity()
    }

    /// Queue a text frame; see [`ConnectionHandle::send`]
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::Text(text.into()))
    }

    /// Queue a ping frame.
    ///
    /// Like any other frame it is dropped when the queue is full, so a
    /// reader that has fallen that far behind fails the next liveness check.
    pub fn ping(&self) -> bool {
        self.send(Message::Ping(Vec::new()))
    }

    /// False between a ping and its pong
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Called when a pong arrives
    pub fn mark_alive(&self) {
        self.inner.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag ahead of a ping
    pub fn mark_suspect(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    /// Drop the socket without a close handshake
    pub fn terminate(&self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminate.is_cancelled()
    }

    fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    fn terminated(&self) -> CancellationToken {
        self.inner.terminate.clone()
    }

    /// Record interest in `topic`. Returns false if already present.
    pub fn add_topic(&self, topic: &str) -> bool {
        self.inner.topics.lock().insert(topic.to_string())
    }

    /// Returns whether `topic` was present
    pub fn remove_topic(&self, topic: &str) -> bool {
        self.inner.topics.lock().remove(topic)
    }

    /// Remove and return every recorded topic
    pub fn take_topics(&self) -> Vec<String> {
        self.inner.topics.lock().drain().collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.lock().iter().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("open", &self.is_open())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Every connection currently attached to a [`WebSocketServer`]
#[derive(Clone, Default)]
pub struct ConnectionPool {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `conn` and update the active-connection gauge
    pub fn insert(&self, conn: ConnectionHandle) {
        let count = {
            let mut connections = self.connections.write();
            connections.insert(conn.id(), conn);
            connections.len()
        };
        observability::metrics::set_active_connections(count);
    }

    /// Stop tracking `id`. The handle is returned so the caller can clean up.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id);
            (removed, connections.len())
        };
        observability::metrics::set_active_connections(count);
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().get(&id).cloned()
    }

    /// Point-in-time copy, safe to iterate while connections come and go
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

/// Application logic plugged into the socket loop.
///
/// Called from the connection's read task; implementations must not block.
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound data frame; a returned frame is queued as the reply.
    fn handle(&self, conn: &ConnectionHandle, message: Message) -> Option<Message>;

    fn on_connect(&self, _conn: &ConnectionHandle) {}

    /// Runs exactly once per connection, however it ended
    fn on_disconnect(&self, _conn: &ConnectionHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Client,
    Terminated,
    ServerShutdown,
    Error,
}

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WebSocketServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    bound_addr: Arc<RwLock<Option<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
    pool: ConnectionPool,
    handler: Arc<dyn MessageHandler>,
    outbound_capacity: usize,
}

impl WebSocketServer {
    /// WebSocket listener on `config.websocket_port`, feeding frames to `handler`
    pub fn with_handler(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(RwLock::new(None)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            pool: ConnectionPool::new(),
            handler,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Per-connection outbound queue size for connections accepted from now on
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        self.config
            .websocket_addr()
            .ok_or_else(|| ServerError::ConfigError("WebSocket port not configured".into()))?
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared view of the live connections
    pub fn pool(&self) -> ConnectionPool {
        self.pool.clone()
    }

    /// Connections currently tracked by the pool
    pub fn connection_count(&self) -> usize {
        self.pool.len()
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn handle_connection(
        &self,
        conn_id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let ws_stream = accept_async(stream).await.map_err(ServerError::WebSocket)?;
        let (mut sink, mut source) = ws_stream.split();

        let (conn, mut outbound_rx) =
            ConnectionHandle::with_capacity(conn_id, Some(peer_addr), self.outbound_capacity);
        let terminated = conn.terminated();

        let writer_token = terminated.clone();
        let mut writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_token.cancelled() => break,
                    next = outbound_rx.recv() => match next {
                        Some(message) => {
                            let closing = message.is_close();
                            if let Err(e) = sink.send(message).await {
                                debug!(conn_id, %e, "WebSocket write failed");
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        self.pool.insert(conn.clone());
        self.handler.on_connect(&conn);
        debug!(conn_id, %peer_addr, "WebSocket connection established");

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break CloseReason::ServerShutdown,
                _ = terminated.cancelled() => break CloseReason::Terminated,
                _ = &mut writer => break CloseReason::Error,
                frame = source.next() => match frame {
                    Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                    Some(Ok(Message::Close(_))) | None => break CloseReason::Client,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(message)) => {
                        if let Some(reply) = self.handler.handle(&conn, message) {
                            conn.send(reply);
                        }
                    }
                    Some(Err(e)) => {
                        debug!(conn_id, %e, "WebSocket read error");
                        break CloseReason::Error;
                    }
                },
            }
        };

        if reason == CloseReason::ServerShutdown {
            // Let the writer flush queued frames plus a close frame
            conn.send(Message::Close(None));
            conn.close();
            let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await;
        }
        conn.terminate();
        writer.abort();

        self.pool.remove(conn_id);
        self.handler.on_disconnect(&conn);
        debug!(conn_id, ?reason, "WebSocket connection closed");
        Ok(())
    }
}

#[async_trait]
impl Server for WebSocketServer {
    fn name(&self) -> &str {
        "websocket"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let addr = self.bind_addr()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        let local_addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.bound_addr.write() = Some(local_addr);
        info!(%local_addr, "WebSocket server listening");

        self.running.store(true, Ordering::SeqCst);

        let mut connection_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("WebSocket server received shutdown signal");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let conn_id = self.next_connection_id();
                            let server = self.clone();
                            let conn_token = shutdown_token.child_token();

                            connection_handles.push(tokio::spawn(async move {
                                if let Err(e) = server
                                    .handle_connection(conn_id, stream, peer_addr, conn_token)
                                    .await
                                {
                                    warn!(conn_id, %e, "WebSocket handshake failed");
                                }
                            }));
                            connection_handles.retain(|h| !h.is_finished());
                        }
                        Err(e) => {
                            error!(%e, "Failed to accept WebSocket connection");
                        }
                    }
                }
            }
        }

        let connection_count = connection_handles.len();
        if connection_count > 0 {
            info!(connection_count, "Waiting for WebSocket connections to close");
            let drained = tokio::time::timeout(
                Duration::from_secs(10),
                futures::future::join_all(connection_handles),
            )
            .await;
            if drained.is_err() {
                warn!("Timed out waiting for WebSocket connections to close");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;
        info!("WebSocket server shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ServerExt;
    use std::sync::atomic::AtomicUsize;

    struct Echo {
        disconnects: AtomicUsize,
    }

    impl MessageHandler for Echo {
        fn handle(&self, _conn: &ConnectionHandle, message: Message) -> Option<Message> {
            match &message {
                Message::Text(_) | Message::Binary(_) => Some(message),
                _ => None,
            }
        }

        fn on_disconnect(&self, _conn: &ConnectionHandle) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_handle_send_and_terminate() {
        let (conn, mut rx) = ConnectionHandle::new(7, None);
        assert!(conn.is_open());
        assert!(conn.send_text("hello"));
        assert!(conn.ping());
        assert_eq!(rx.try_recv().ok(), Some(Message::Text("hello".to_string())));
        assert_eq!(rx.try_recv().ok(), Some(Message::Ping(Vec::new())));

        conn.terminate();
        assert!(!conn.is_open());
        assert!(!conn.send_text("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_not_open_once_receiver_dropped() {
        let (conn, rx) = ConnectionHandle::new(1, None);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send_text("nobody listening"));
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let (conn, mut rx) = ConnectionHandle::with_capacity(3, None, 2);
        assert!(conn.send_text("one"));
        assert!(conn.send_text("two"));
        assert!(!conn.send_text("three"));
        assert!(!conn.ping());
        assert_eq!(conn.queued(), 2);
        assert!(conn.is_open());

        assert_eq!(rx.try_recv().ok(), Some(Message::Text("one".to_string())));
        assert_eq!(conn.queued(), 1);
        assert!(conn.send_text("four"));

        assert_eq!(rx.try_recv().ok(), Some(Message::Text("two".to_string())));
        assert_eq!(rx.try_recv().ok(), Some(Message::Text("four".to_string())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let (conn, _rx) = ConnectionHandle::with_capacity(1, None, 0);
        assert!(conn.send_text("fits"));
        assert!(!conn.send_text("does not"));

        let server = WebSocketServer::with_handler(
            ServerConfig::websocket_only("127.0.0.1", 0),
            Arc::new(Echo {
                disconnects: AtomicUsize::new(0),
            }),
        )
        .with_outbound_capacity(0);
        assert_eq!(server.outbound_capacity(), 1);
    }

    #[test]
    fn test_liveness_flag() {
        let (conn, _rx) = ConnectionHandle::new(1, None);
        assert!(conn.is_alive());
        conn.mark_suspect();
        assert!(!conn.is_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[test]
    fn test_topics() {
        let (conn, _rx) = ConnectionHandle::new(1, None);
        assert!(conn.add_topic("4071:-7401"));
        assert!(!conn.add_topic("4071:-7401"));
        assert!(conn.add_topic("4075:-7399"));
        assert!(conn.remove_topic("4075:-7399"));

        let mut taken = conn.take_topics();
        taken.sort();
        assert_eq!(taken, vec!["4071:-7401".to_string()]);
        assert!(conn.topics().is_empty());
    }

    #[test]
    fn test_pool() {
        let pool = ConnectionPool::new();
        let (a, _ra) = ConnectionHandle::new(1, None);
        let (b, _rb) = ConnectionHandle::new(2, None);
        pool.insert(a);
        pool.insert(b);
        assert_eq!(pool.len(), 2);
        assert!(pool.get(2).is_some());

        assert!(pool.remove(1).is_some());
        assert!(pool.remove(1).is_none());
        assert_eq!(pool.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_echo_roundtrip_and_disconnect() {
        let handler = Arc::new(Echo {
            disconnects: AtomicUsize::new(0),
        });
        let server = WebSocketServer::with_handler(
            ServerConfig::websocket_only("127.0.0.1", 0),
            handler.clone(),
        );
        let observer = server.clone();
        let (handle, token) = server.spawn();

        assert!(wait_for(|| observer.address().is_some()).await);
        let addr = observer.address().unwrap();

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(wait_for(|| observer.connection_count() == 1).await);

        client.send(Message::Text("hi".to_string())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("hi".to_string()));

        client.close(None).await.unwrap();
        assert!(wait_for(|| observer.connection_count() == 0).await);
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
    }

    #[tokio::test]
    async fn test_terminate_drops_socket() {
        let handler = Arc::new(Echo {
            disconnects: AtomicUsize::new(0),
        });
        let server = WebSocketServer::with_handler(
            ServerConfig::websocket_only("127.0.0.1", 0),
            handler.clone(),
        );
        let observer = server.clone();
        let (_handle, token) = server.spawn();

        assert!(wait_for(|| observer.address().is_some()).await);
        let addr = observer.address().unwrap();
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(wait_for(|| observer.connection_count() == 1).await);

        for conn in observer.pool().snapshot() {
            conn.terminate();
        }
        assert!(wait_for(|| observer.connection_count() == 0).await);
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);

        // Socket is gone: the client sees end of stream or an error
        let next = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap();
        assert!(!matches!(next, Some(Ok(Message::Text(_)))));

        token.cancel();
    }
}
