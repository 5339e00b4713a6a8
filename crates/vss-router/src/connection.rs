//! Live connection set
//!
//! Every outbound frame goes through [`Connections`]: responses from the
//! dispatcher as well as unsolicited updates from the subscription
//! registries, which see it as their [`MessageSink`].

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use vss_core::{ConnectionId, MessageSink, ResponseMessage};

/// Inbound processing state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, backend session not yet established
    Paused,
    Active,
}

struct Connection {
    state: ConnectionState,
    tx: mpsc::UnboundedSender<ResponseMessage>,
}

#[derive(Default)]
pub struct Connections {
    inner: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in the paused state
    pub fn register(&self, id: ConnectionId, tx: mpsc::UnboundedSender<ResponseMessage>) {
        self.inner.write().insert(
            id,
            Connection {
                state: ConnectionState::Paused,
                tx,
            },
        );
        debug!(connection = %id, "Connection registered");
    }

    pub fn resume(&self, id: ConnectionId) -> bool {
        match self.inner.write().get_mut(&id) {
            Some(conn) => {
                conn.state = ConnectionState::Active;
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.inner.read().get(&id).map(|c| c.state)
    }

    /// Forget a connection. Drops its sender, which ends its writer task.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.inner.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn send(&self, id: ConnectionId, message: ResponseMessage) -> bool {
        match self.inner.read().get(&id) {
            Some(conn) => conn.tx.send(message).is_ok(),
            None => false,
        }
    }
}

impl MessageSink for Connections {
    fn deliver(&self, connection: ConnectionId, message: ResponseMessage) -> bool {
        self.send(connection, message)
    }
}
