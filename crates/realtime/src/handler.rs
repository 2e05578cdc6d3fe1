//! WebSocket message handling for the real-time fabric

use chrono::Utc;
use common::{DriverId, GeoPoint};
use server::{ConnectionHandle, MessageHandler};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::cell::cell_of;
use crate::protocol::{validated_point, ClientMessage, ProtocolError, ServerMessage};
use crate::registry::SubscriptionRegistry;

/// Receives driver positions seen on the socket, e.g. to persist them.
///
/// Called inline from the read loop: implementations hand off and return.
pub trait LocationSink: Send + Sync {
    fn record(&self, driver_id: &DriverId, point: GeoPoint);
}

/// [`MessageHandler`] for the geo-cell subscription protocol
pub struct RealtimeHandler {
    registry: Arc<SubscriptionRegistry>,
    sink: Option<Arc<dyn LocationSink>>,
}

impl RealtimeHandler {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            sink: None,
        }
    }

    /// Forward accepted location updates to `sink`
    pub fn with_location_sink(mut self, sink: Arc<dyn LocationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Process one text frame; `None` means no direct reply
    pub fn handle_text(&self, conn: &ConnectionHandle, text: &str) -> Option<ServerMessage> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(conn_id = conn.id(), error = %e, "Rejected frame");
                return Some(ServerMessage::error(&e));
            }
        };

        match self.dispatch(conn, message) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(conn_id = conn.id(), error = %e, "Rejected message");
                Some(ServerMessage::error(&e))
            }
        }
    }

    fn dispatch(
        &self,
        conn: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<Option<ServerMessage>, ProtocolError> {
        match message {
            ClientMessage::Ping => Ok(Some(ServerMessage::Pong {
                timestamp: Utc::now().timestamp_millis(),
            })),

            ClientMessage::Subscribe { lat, lng } => {
                let point = validated_point(lat, lng)?;
                let cell = cell_of(&point);
                self.registry.subscribe(conn, &cell);
                Ok(Some(ServerMessage::Subscribed { cell, lat, lng }))
            }

            ClientMessage::Unsubscribe { lat: Some(lat), lng: Some(lng) } => {
                let point = validated_point(lat, lng)?;
                let cell = cell_of(&point);
                self.registry.unsubscribe_cell(conn, &cell);
                Ok(Some(ServerMessage::Unsubscribed { cell }))
            }

            ClientMessage::Unsubscribe { lat: None, lng: None } => {
                let cells = self.registry.unsubscribe(conn);
                Ok(Some(ServerMessage::UnsubscribedAll { cells }))
            }

            ClientMessage::Unsubscribe { .. } => Err(ProtocolError::InvalidPayload(
                "lat and lng must be given together".into(),
            )),

            ClientMessage::DriverLocation { driver_id, lat, lng } => {
                if driver_id.trim().is_empty() {
                    return Err(ProtocolError::InvalidPayload("driverId must not be empty".into()));
                }
                let point = validated_point(lat, lng)?;
                let cell = cell_of(&point);

                let update = ServerMessage::DriverUpdate {
                    driver_id: driver_id.clone(),
                    lat,
                    lng,
                    timestamp: Utc::now().timestamp_millis(),
                };
                let delivered = self.registry.publish(&cell, &update);
                debug!(driver_id = %driver_id, cell = %cell, delivered, "Driver location fanned out");

                if let Some(sink) = &self.sink {
                    sink.record(&DriverId::new(driver_id), point);
                }
                Ok(None)
            }

            ClientMessage::Unrecognized => Err(ProtocolError::UnknownType),
        }
    }
}

impl MessageHandler for RealtimeHandler {
    fn handle(&self, conn: &ConnectionHandle, message: Message) -> Option<Message> {
        let reply = match message {
            Message::Text(text) => self.handle_text(conn, &text),
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.handle_text(conn, &text),
                Err(e) => Some(ServerMessage::error(&ProtocolError::InvalidJson(e.to_string()))),
            },
            _ => None,
        };
        reply.map(|reply| Message::Text(reply.to_json()))
    }

    fn on_connect(&self, conn: &ConnectionHandle) {
        debug!(conn_id = conn.id(), peer = ?conn.peer_addr(), "Client connected");
    }

    fn on_disconnect(&self, conn: &ConnectionHandle) {
        let cells = self.registry.unsubscribe(conn);
        if cells > 0 {
            debug!(conn_id = conn.id(), cells, "Cleared subscriptions on disconnect");
        }
    }
}
