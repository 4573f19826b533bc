use std::{
    io, mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use watchfs::{WatchEvent, WatchFs};

use crate::{
    daemon::{
        connection::{ActiveConnection, ConnectionEvent, ConnectionId, Outbox},
        rewatch,
    },
    protocol::{preview, SyncMessage},
};

/// Whether the next change notification is expected to be the echo of a
/// write the daemon made itself.
///
/// The expected content hash is recorded before the write is issued, and the
/// watch handler compares it against what is actually on disk. A notification
/// is only suppressed when the file holds exactly what we wrote; anything else
/// is an external edit that raced ours, and gets forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    AwaitingSelfWrite(blake3::Hash),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// The new content was sent to the active connection.
    Forwarded,
    /// The change was the echo of our own write.
    Suppressed,
    /// The content is the same as the last content seen; nothing to send.
    Unchanged,
    /// There is no open connection to send to. The change is dropped.
    NoConnection,
    /// The file could not be read. The notification is dropped.
    ReadFailed,
    /// The event was not about the synced file, or was not a content change.
    Ignored,
    /// The synced file was removed and nothing has replaced it yet.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Failed,
}

#[derive(Debug, Error)]
pub enum FileIoError {
    #[error("Could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// All of the daemon's mutable state. Every method is called from the
/// processor thread, one event at a time, so none of this needs locking.
pub struct SyncState {
    fs: Arc<WatchFs>,

    /// Canonical path of the synced file.
    path: PathBuf,

    active: Option<ActiveConnection>,

    write_state: WriteState,

    /// Hash of the content most recently seen on disk or written by us since
    /// the active connection opened. Repeated notifications for the same
    /// content are not forwarded twice.
    last_seen: Option<blake3::Hash>,

    /// Whether the pending self-write came from the active connection. An
    /// echo of a superseded connection's write is content the active page
    /// has never seen, so it must not count as seen.
    writer_is_active: bool,
}

impl SyncState {
    pub fn new(fs: Arc<WatchFs>, path: PathBuf) -> Self {
        Self {
            fs,
            path,
            active: None,
            write_state: WriteState::Idle,
            last_seen: None,
            writer_is_active: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.active.as_ref().map(|connection| connection.id)
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { id, outbox } => self.on_connection_opened(id, outbox),
            ConnectionEvent::Closed { id } => self.on_connection_closed(id),
            ConnectionEvent::Message { id, message } => {
                self.on_message_received(id, message);
            }
        }
    }

    pub fn handle_watch_event(&mut self, event: WatchEvent) -> FileChange {
        if event.path() != self.path {
            log::trace!("Ignoring change to {}", event.path().display());
            return FileChange::Ignored;
        }

        match event {
            WatchEvent::Create(_) | WatchEvent::Write(_) => self.on_file_changed(),
            // Editors that save by renaming the old file away remove it right
            // before creating the new one. The debouncer delivers both at
            // once, so by now the replacement is already on disk.
            WatchEvent::Remove(_) => match self.fs.exists(&self.path) {
                Ok(true) => {
                    log::debug!("{} was replaced", self.path.display());
                    FileChange::Ignored
                }
                _ => {
                    log::warn!(
                        "Synced file {} was removed. Changes will resume when it is recreated.",
                        self.path.display()
                    );
                    self.last_seen = None;
                    FileChange::Missing
                }
            },
            _ => FileChange::Ignored,
        }
    }

    /// Makes `outbox` the active connection, replacing any other.
    pub fn on_connection_opened(&mut self, id: ConnectionId, outbox: Outbox) {
        if let Some(previous) = &self.active {
            if previous.is_open() {
                log::warn!(
                    "Connection {} replaces connection {}, which is still open",
                    id,
                    previous.id
                );
            }
        }

        log::info!("Client connected ({})", id);
        self.active = Some(ActiveConnection::new(id, outbox));
        self.last_seen = None;
    }

    pub fn on_connection_closed(&mut self, id: ConnectionId) {
        match &self.active {
            Some(active) if active.id == id => {
                log::info!("Client disconnected ({})", id);
                self.active = None;
            }
            _ => log::debug!("Superseded connection {} closed", id),
        }
    }

    /// The watcher lost events. Re-establishes the watch and re-reads the
    /// file in case one of the lost events was a change to it.
    pub fn on_rescan(&mut self) -> FileChange {
        if let Some(root) = self.path.parent() {
            if let Err(err) = rewatch(&self.fs, root) {
                log::error!("Could not restart watch on {}: {}", root.display(), err);
            }
        }

        self.on_file_changed()
    }

    pub fn on_file_changed(&mut self) -> FileChange {
        let contents = match self.fs.read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(source) => {
                let err = FileIoError::Read {
                    path: self.path.clone(),
                    source,
                };
                log::error!("{}", err);
                return FileChange::ReadFailed;
            }
        };

        let hash = blake3::hash(contents.as_bytes());

        if let WriteState::AwaitingSelfWrite(expected) =
            mem::replace(&mut self.write_state, WriteState::Idle)
        {
            if expected == hash {
                log::debug!("Suppressed change notification for our own write");
                self.last_seen = self.writer_is_active.then_some(hash);
                return FileChange::Suppressed;
            }

            log::debug!("File differs from what we wrote; treating it as an external edit");
        }

        if self.last_seen == Some(hash) {
            log::trace!("File content unchanged since last notification");
            return FileChange::Unchanged;
        }
        self.last_seen = Some(hash);

        log::info!("File changed on disk: {}", preview(&contents));

        match &self.active {
            Some(connection) if connection.is_open() => {
                if connection.send(SyncMessage::sync(contents)) {
                    log::debug!("Forwarded file contents to {}", connection.id);
                    FileChange::Forwarded
                } else {
                    log::debug!("Connection {} closed before send", connection.id);
                    FileChange::NoConnection
                }
            }
            _ => {
                log::debug!("No active connection; dropping file change");
                FileChange::NoConnection
            }
        }
    }

    /// Writes inbound content to the file. The suppression state is armed
    /// before the write and disarmed again if the write fails.
    pub fn on_message_received(&mut self, id: ConnectionId, message: SyncMessage) -> WriteOutcome {
        self.writer_is_active = self.active_connection() == Some(id);
        if !self.writer_is_active {
            log::debug!("Applying message from superseded connection {}", id);
            self.last_seen = None;
        }

        let value = message.into_value();
        self.write_state = WriteState::AwaitingSelfWrite(blake3::hash(value.as_bytes()));

        match self.fs.write(&self.path, value.as_bytes()) {
            Ok(()) => {
                log::info!("Updated file from page: {}", preview(&value));
                WriteOutcome::Written
            }
            Err(source) => {
                // The page now holds content the file never got, so whatever
                // the file says next has to reach it.
                self.write_state = WriteState::Idle;
                self.last_seen = None;
                let err = FileIoError::Write {
                    path: self.path.clone(),
                    source,
                };
                log::error!("{}", err);
                WriteOutcome::Failed
            }
        }
    }
}
