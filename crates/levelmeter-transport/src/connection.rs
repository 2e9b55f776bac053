//! Connection lifecycle events and shared state.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use levelmeter_ipc::ConnectionState;

use crate::error::TransportError;

/// Identifies one `open` of the connection.
///
/// Events from a superseded connection still carry the old id, so the
/// receiver can tell them apart after a retarget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseInitiator {
    /// `close()` was called.
    Caller,

    /// The remote end sent a close frame or ended the stream.
    Peer,

    /// The connection failed (connect or I/O error).
    Failure,
}

/// Events surfaced by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake completed; subscriptions for known devices were sent.
    Opened { id: ConnectionId, url: String },

    /// One inbound text frame.
    Frame { id: ConnectionId, text: String },

    /// Connection ended.
    Closed {
        id: ConnectionId,
        url: String,
        initiator: CloseInitiator,
        code: Option<u16>,
    },

    /// Connection failed.
    Error {
        id: ConnectionId,
        error: TransportError,
    },
}

impl ConnectionEvent {
    /// Id of the connection that raised this event.
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Opened { id, .. }
            | Self::Frame { id, .. }
            | Self::Closed { id, .. }
            | Self::Error { id, .. } => *id,
        }
    }
}

/// State shared between the manager and its connection task.
///
/// Only the task whose id is current may move the state, so a superseded
/// task winding down cannot clobber a newer connection.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    current: u64,
    state: ConnectionState,
}

impl SharedState {
    pub(crate) fn get(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Starts a new connection and returns its id.
    pub(crate) fn begin(&self) -> ConnectionId {
        let mut inner = self.inner.write();
        inner.current += 1;
        inner.state = ConnectionState::Connecting;
        ConnectionId(inner.current)
    }

    /// Moves the state if `id` is still the current connection.
    pub(crate) fn transition(&self, id: ConnectionId, state: ConnectionState) -> bool {
        let mut inner = self.inner.write();
        if inner.current != id.0 {
            return false;
        }
        inner.state = state;
        true
    }

    /// Moves the state if `id` is current and the state is still `expected`.
    pub(crate) fn advance(
        &self,
        id: ConnectionId,
        expected: ConnectionState,
        next: ConnectionState,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.current != id.0 || inner.state != expected {
            return false;
        }
        inner.state = next;
        true
    }
}
