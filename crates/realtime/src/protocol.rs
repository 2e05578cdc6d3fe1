//! JSON wire protocol
//!
//! Every frame is an object with a `type` discriminator. Inbound frames
//! parse into [`ClientMessage`]; replies and broadcasts are
//! [`ServerMessage`]s. A bad frame produces an `ERROR` reply and never
//! closes the connection.

use common::GeoPoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Ping,
    Subscribe {
        lat: f64,
        lng: f64,
    },
    /// Both coordinates: leave that cell. Neither: leave every cell.
    Unsubscribe {
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
    },
    DriverLocation {
        #[serde(rename = "driverId")]
        driver_id: String,
        lat: f64,
        lng: f64,
    },
    /// Any `type` not listed above
    #[serde(other)]
    Unrecognized,
}

impl ClientMessage {
    /// Decode one client frame.
    ///
    /// # Errors
    ///
    /// Distinguishes bad JSON, a missing or non-string `type`, and a payload
    /// that does not match its `type`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        match value.get("type") {
            Some(Value::String(_)) => {}
            _ => return Err(ProtocolError::MissingType),
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Pong {
        timestamp: i64,
    },
    Subscribed {
        cell: String,
        lat: f64,
        lng: f64,
    },
    Unsubscribed {
        cell: String,
    },
    UnsubscribedAll {
        cells: usize,
    },
    DriverUpdate {
        #[serde(rename = "driverId")]
        driver_id: String,
        lat: f64,
        lng: f64,
        timestamp: i64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Error frame for `err`, carrying its code and display text
    pub fn error(err: &ProtocolError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Serialized frame, ready to queue
    pub fn to_json(&self) -> String {
        // Only strings and finite numbers in here
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"ERROR","code":"INTERNAL_ERROR","message":"{}"}}"#,
                e
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    MissingType,
    InvalidPayload,
    UnknownType,
    InvalidCoordinates,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("message must be an object with a string \"type\" field")]
    MissingType,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown message type")]
    UnknownType,

    #[error("{0}")]
    InvalidCoordinates(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidJson(_) => ErrorCode::InvalidJson,
            ProtocolError::MissingType => ErrorCode::MissingType,
            ProtocolError::InvalidPayload(_) => ErrorCode::InvalidPayload,
            ProtocolError::UnknownType => ErrorCode::UnknownType,
            ProtocolError::InvalidCoordinates(_) => ErrorCode::InvalidCoordinates,
        }
    }
}

/// Range-check a coordinate pair from the wire
pub fn validated_point(lat: f64, lng: f64) -> Result<GeoPoint, ProtocolError> {
    GeoPoint::validated(lat, lng).map_err(|e| match e {
        common::Error::InvalidInput(msg) => ProtocolError::InvalidCoordinates(msg),
        other => ProtocolError::InvalidCoordinates(other.to_string()),
    })
}
