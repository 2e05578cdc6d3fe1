//! Real-time location fan-out for Orbit
//!
//! Clients subscribe to geo cells over WebSocket; driver location updates
//! are published to every connection subscribed to the driver's cell. A
//! liveness monitor pings every connection on a fixed period and drops the
//! ones that stop answering.
//!
//! The registry is process-local. Running several instances needs a fan-out
//! layer between them.

pub mod cell;
pub mod handler;
pub mod liveness;
pub mod protocol;
pub mod registry;

pub use cell::{cell_id, CellId};
pub use handler::{LocationSink, RealtimeHandler};
pub use liveness::{connection_stats, ConnectionStats, LivenessMonitor, SweepReport};
pub use protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
pub use registry::SubscriptionRegistry;
