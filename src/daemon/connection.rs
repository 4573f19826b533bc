use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::SyncMessage;

/// Channel a socket task reads outgoing messages from.
pub type Outbox = UnboundedSender<SyncMessage>;

/// Identifies one socket for the lifetime of a daemon. Only used to tell the
/// active connection apart from superseded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing connection IDs.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Lifecycle and payload events a socket task reports to the daemon's
/// processor thread.
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened { id: ConnectionId, outbox: Outbox },
    Message { id: ConnectionId, message: SyncMessage },
    Closed { id: ConnectionId },
}

/// The one connection file changes are forwarded to.
#[derive(Debug)]
pub struct ActiveConnection {
    pub id: ConnectionId,
    outbox: Outbox,
}

impl ActiveConnection {
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self { id, outbox }
    }

    /// False once the socket task has stopped reading its outbox.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    pub fn send(&self, message: SyncMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}
