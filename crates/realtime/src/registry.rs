//! Cell -> subscribers index
//!
//! Each connection records its own cells (its topic set); the registry maps
//! a cell back to the connections in it, for fan-out only. Both sides are
//! updated together so neither keeps a dangling entry.

use parking_lot::RwLock;
use server::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use tracing::debug;

use crate::protocol::ServerMessage;

/// Fan-out index from cell to subscribed connections
#[derive(Default)]
pub struct SubscriptionRegistry {
    cells: RwLock<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already in the cell
    pub fn subscribe(&self, conn: &ConnectionHandle, cell: &str) -> bool {
        conn.add_topic(cell);
        let added = self
            .cells
            .write()
            .entry(cell.to_string())
            .or_default()
            .insert(conn.id(), conn.clone())
            .is_none();
        debug!(conn_id = conn.id(), cell, added, "Subscribed");
        added
    }

    /// Leave one cell. Returns whether the connection was in it.
    pub fn unsubscribe_cell(&self, conn: &ConnectionHandle, cell: &str) -> bool {
        conn.remove_topic(cell);
        let mut cells = self.cells.write();
        let removed = Self::remove_from(&mut cells, conn.id(), cell);
        debug!(conn_id = conn.id(), cell, removed, "Unsubscribed");
        removed
    }

    /// Leave every cell. Returns how many cells the connection was in.
    pub fn unsubscribe(&self, conn: &ConnectionHandle) -> usize {
        let topics = conn.take_topics();
        let mut cells = self.cells.write();
        let removed = topics
            .iter()
            .filter(|cell| Self::remove_from(&mut cells, conn.id(), cell))
            .count();
        debug!(conn_id = conn.id(), removed, "Unsubscribed from all cells");
        removed
    }

    fn remove_from(
        cells: &mut HashMap<String, HashMap<ConnectionId, ConnectionHandle>>,
        id: ConnectionId,
        cell: &str,
    ) -> bool {
        let Some(subscribers) = cells.get_mut(cell) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            cells.remove(cell);
        }
        removed
    }

    /// Queue `message` on every open subscriber of `cell`. Closed
    /// connections are skipped. Returns the number of deliveries.
    pub fn publish(&self, cell: &str, message: &ServerMessage) -> usize {
        let subscribers: Vec<ConnectionHandle> = match self.cells.read().get(cell) {
            Some(subscribers) => subscribers.values().cloned().collect(),
            None => return 0,
        };

        let payload = message.to_json();
        let delivered = subscribers
            .iter()
            .filter(|conn| conn.is_open() && conn.send_text(payload.clone()))
            .count();

        observability::metrics::record_published(delivered);
        debug!(cell, subscribers = subscribers.len(), delivered, "Published");
        delivered
    }

    /// Subscribers in `cell`; zero for an unknown cell
    pub fn subscriber_count(&self, cell: &str) -> usize {
        self.cells.read().get(cell).map_or(0, HashMap::len)
    }

    /// Cells with at least one subscriber
    pub fn cell_count(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_subscribed(&self, conn: &ConnectionHandle, cell: &str) -> bool {
        self.cells
            .read()
            .get(cell)
            .is_some_and(|subscribers| subscribers.contains_key(&conn.id()))
    }
}
