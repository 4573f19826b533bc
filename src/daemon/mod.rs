//! The sync daemon: watches one file and relays its content to and from the
//! page connected over the websocket server.

mod connection;
mod processor;
mod state;

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use watchfs::{WatchFs, WatcherCriticalError};

pub use self::connection::{ConnectionEvent, ConnectionId, ConnectionIds, Outbox};
pub use self::state::{FileChange, FileIoError, SyncState, WriteOutcome, WriteState};

use self::processor::DaemonProcessor;

/// A running daemon. Dropping it stops the processor thread and removes the
/// file watch.
pub struct SyncDaemon {
    fs: Arc<WatchFs>,

    /// Canonical path of the synced file.
    path: PathBuf,

    /// The directory actually being watched. Editors that save atomically
    /// replace the file itself, so the watch sits on its parent.
    watch_root: PathBuf,

    connection_sender: Sender<ConnectionEvent>,

    processor: Option<DaemonProcessor>,
}

impl SyncDaemon {
    /// Creates the file if it doesn't exist yet, starts watching it, and
    /// spins up the processor thread.
    pub fn start(
        fs: WatchFs,
        path: &Path,
        critical_errors: Option<Receiver<WatcherCriticalError>>,
    ) -> Result<Self, DaemonError> {
        let created = fs
            .create_if_missing(path)
            .map_err(|source| DaemonError::CreateFile {
                path: path.to_path_buf(),
                source,
            })?;

        if created {
            log::info!("Created empty file {}", path.display());
        }

        let path = fs.canonicalize(path).map_err(|source| DaemonError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;

        let watch_root = path
            .parent()
            .ok_or_else(|| DaemonError::NoParent { path: path.clone() })?
            .to_path_buf();

        fs.watch(&watch_root).map_err(|source| DaemonError::Watch {
            path: watch_root.clone(),
            source,
        })?;

        let fs = Arc::new(fs);
        let (connection_sender, connection_receiver) = crossbeam_channel::unbounded();

        let processor = DaemonProcessor::start(
            SyncState::new(Arc::clone(&fs), path.clone()),
            fs.event_receiver(),
            connection_receiver,
            critical_errors,
        )
        .map_err(DaemonError::Thread)?;

        log::info!("Watching {}", path.display());

        Ok(Self {
            fs,
            path,
            watch_root,
            connection_sender,
            processor: Some(processor),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The channel socket tasks report connection events on.
    pub fn connection_sender(&self) -> Sender<ConnectionEvent> {
        self.connection_sender.clone()
    }

    /// Drops and re-establishes the watch. The processor already does this
    /// on its own when the watcher reports lost events; this is for callers
    /// that have other reasons to distrust the watch.
    pub fn restart_watch(&self) -> Result<(), DaemonError> {
        rewatch(&self.fs, &self.watch_root).map_err(|source| DaemonError::Watch {
            path: self.watch_root.clone(),
            source,
        })
    }
}

/// Unwatches `root` and watches it again.
pub(crate) fn rewatch(fs: &WatchFs, root: &Path) -> io::Result<()> {
    if let Err(err) = fs.unwatch(root) {
        log::debug!("Could not remove watch on {}: {}", root.display(), err);
    }

    fs.watch(root)
}

impl Drop for SyncDaemon {
    fn drop(&mut self) {
        // Stop the processor before tearing down the watch it reads from.
        drop(self.processor.take());

        if let Err(err) = self.fs.unwatch(&self.watch_root) {
            log::debug!("Could not remove watch on {}: {}", self.watch_root.display(), err);
        }
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Could not create or open {}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not watch {}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} has no parent directory to watch", path.display())]
    NoParent { path: PathBuf },

    #[error("Could not start the daemon thread")]
    Thread(#[source] io::Error),
}
