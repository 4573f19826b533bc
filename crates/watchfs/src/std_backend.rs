use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{collections::HashSet, io};

use crossbeam_channel::{Receiver, Sender};
use notify::RecursiveMode;
use notify_debouncer_full::{
    new_debouncer,
    notify::event::{EventKind, ModifyKind, RenameMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use crate::{WatchBackend, WatchEvent};

/// Debounce window for raw notify events. Editors commonly produce a burst of
/// truncate/write/metadata events for one save.
const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(50);

/// Errors that mean the watcher may have missed changes.
#[derive(Debug, Clone)]
pub enum WatcherCriticalError {
    WatcherError {
        error: String,
        path: Option<PathBuf>,
    },
    /// The OS event queue overflowed. Anything watched should be re-read.
    RescanRequired,
    /// The event channel's receiver is gone.
    ChannelSendFailed(String),
}

impl std::fmt::Display for WatcherCriticalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WatcherError {
                error,
                path: Some(path),
            } => write!(f, "Watch error on {}: {}", path.display(), error),
            Self::WatcherError { error, path: None } => write!(f, "Watch error: {}", error),
            Self::RescanRequired => f.write_str("Watcher overflowed; changes may have been missed"),
            Self::ChannelSendFailed(err) => write!(f, "Could not deliver watch event: {}", err),
        }
    }
}

impl std::error::Error for WatcherCriticalError {}

/// Called on every critical error. Returning `true` stops reporting events.
pub type CriticalErrorHandler = Box<dyn Fn(WatcherCriticalError) -> bool + Send + Sync + 'static>;

/// `WatchBackend` that uses `std::fs` and the `notify` crate.
///
/// Watches are non-recursive: watching a directory reports changes to the
/// directory's direct children. Watching the parent directory of a file,
/// rather than the file itself, keeps working when editors save by writing a
/// temporary file and renaming it over the original.
pub struct StdBackend {
    debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    watcher_receiver: Receiver<WatchEvent>,
    watches: HashSet<PathBuf>,
    critical_error_receiver: Receiver<WatcherCriticalError>,
}

impl StdBackend {
    /// Creates a new StdBackend with default error handling.
    ///
    /// `RescanRequired` is logged and otherwise ignored; the next change to
    /// the file still produces an event. Every other critical error is logged
    /// and the watcher thread keeps running, since a single lost event only
    /// delays synchronization until the next edit.
    pub fn new() -> StdBackend {
        Self::new_with_error_handler(Box::new(|err| {
            match &err {
                WatcherCriticalError::RescanRequired => {
                    log::warn!(
                        "File watcher requested rescan due to rapid changes. \
                         Some file events may have been missed."
                    );
                }
                _ => {
                    log::error!("{}", err);
                }
            }
            false
        }))
    }

    /// Creates a new StdBackend with a custom error handler.
    ///
    /// The error handler is called when critical errors occur in the watcher thread.
    /// Critical errors are also sent to the `critical_error_receiver()` channel,
    /// which can be polled alongside `event_receiver()`.
    pub fn new_with_error_handler(error_handler: CriticalErrorHandler) -> StdBackend {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();

        let debouncer = Self::create_debouncer(event_tx, error_tx, error_handler);

        Self {
            debouncer,
            watcher_receiver: event_rx,
            watches: HashSet::new(),
            critical_error_receiver: error_rx,
        }
    }

    fn create_debouncer(
        event_tx: Sender<WatchEvent>,
        error_tx: Sender<WatcherCriticalError>,
        error_handler: CriticalErrorHandler,
    ) -> Debouncer<notify::RecommendedWatcher, RecommendedCache> {
        let report = move |critical_err: WatcherCriticalError| -> bool {
            let _ = error_tx.send(critical_err.clone());
            error_handler(critical_err)
        };

        new_debouncer(
            DEBOUNCE_TIMEOUT,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for watch_event in Self::convert_event(&event.event) {
                            if let Err(err) = event_tx.send(watch_event) {
                                if report(WatcherCriticalError::ChannelSendFailed(
                                    err.to_string(),
                                )) {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        let critical_err = if error.paths.is_empty() {
                            WatcherCriticalError::RescanRequired
                        } else {
                            WatcherCriticalError::WatcherError {
                                error: format!("{:?}", error.kind),
                                path: error.paths.first().cloned(),
                            }
                        };

                        if report(critical_err) {
                            return;
                        }
                    }
                }
            },
        )
        .expect("Failed to create file watcher debouncer")
    }

    /// Convert a notify event to our WatchEvent(s)
    fn convert_event(event: &notify::Event) -> Vec<WatchEvent> {
        let paths = event.paths.iter().cloned();

        match &event.kind {
            EventKind::Create(_) => paths.map(WatchEvent::Create).collect(),

            // Metadata-only changes (permissions, timestamps) never alter
            // the text we synchronize.
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),

            // A rename with both ends known: the old path disappears and the
            // new path appears. An editor's atomic save lands here with the
            // synced file as the destination.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                vec![
                    WatchEvent::Remove(event.paths[0].clone()),
                    WatchEvent::Create(event.paths[1].clone()),
                ]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.map(WatchEvent::Remove).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                paths.map(WatchEvent::Create).collect()
            }

            EventKind::Modify(_) | EventKind::Other | EventKind::Any => {
                paths.map(WatchEvent::Write).collect()
            }

            EventKind::Remove(_) => paths.map(WatchEvent::Remove).collect(),

            EventKind::Access(_) => Vec::new(),
        }
    }

    /// Returns a receiver for critical errors from the watcher thread.
    pub fn critical_error_receiver(&self) -> Receiver<WatcherCriticalError> {
        self.critical_error_receiver.clone()
    }

    /// Creates a new StdBackend suitable for testing. Errors stop the watcher
    /// thread quietly instead of being logged as failures.
    pub fn new_for_testing() -> StdBackend {
        Self::new_with_error_handler(Box::new(|err| {
            log::trace!("Test backend error (expected during test cleanup): {}", err);
            true
        }))
    }
}

impl WatchBackend for StdBackend {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        fs_err::read(path)
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs_err::write(path, data)
    }

    fn exists(&mut self, path: &Path) -> io::Result<bool> {
        std::fs::exists(path)
    }

    fn canonicalize(&mut self, path: &Path) -> io::Result<PathBuf> {
        fs_err::canonicalize(path)
    }

    fn event_receiver(&self) -> Receiver<WatchEvent> {
        self.watcher_receiver.clone()
    }

    fn watch(&mut self, path: &Path) -> io::Result<()> {
        let covered = self.watches.contains(path)
            || path
                .parent()
                .map(|parent| self.watches.contains(parent))
                .unwrap_or(false);

        if covered {
            return Ok(());
        }

        // Only add to watches AFTER the watch succeeds, so a failed watch
        // can be retried.
        match self.debouncer.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                log::debug!("Watching path: {}", path.display());
                self.watches.insert(path.to_path_buf());
                Ok(())
            }
            Err(err) => {
                log::warn!("Failed to watch path {}: {:?}", path.display(), err);
                Err(io::Error::other(format!("{:?}", err)))
            }
        }
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        match self.debouncer.unwatch(path) {
            Ok(()) => {
                log::debug!("Unwatched path: {}", path.display());
                self.watches.remove(path);
                Ok(())
            }
            Err(err) => {
                if matches!(
                    err.kind,
                    notify::ErrorKind::WatchNotFound | notify::ErrorKind::PathNotFound
                ) {
                    self.watches.remove(path);
                    Ok(())
                } else {
                    log::warn!("Failed to unwatch path {}: {:?}", path.display(), err);
                    Err(io::Error::other(format!("{:?}", err)))
                }
            }
        }
    }
}

impl Default for StdBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::tempdir;

    fn notify_event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn watching_twice_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut backend = StdBackend::new_for_testing();

        assert!(backend.watch(dir.path()).is_ok());
        assert!(backend.watch(dir.path()).is_ok());
        assert_eq!(backend.watches.len(), 1);
    }

    #[test]
    fn parent_watch_covers_child_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        fs_err::write(&file_path, "test content").unwrap();

        let mut backend = StdBackend::new_for_testing();
        assert!(backend.watch(dir.path()).is_ok());
        assert!(backend.watch(&file_path).is_ok());
        assert_eq!(backend.watches.len(), 1);
    }

    #[test]
    fn watch_then_unwatch_then_watch_again() {
        let dir = tempdir().unwrap();
        let mut backend = StdBackend::new_for_testing();

        for _ in 0..5 {
            assert!(backend.watch(dir.path()).is_ok());
            assert!(backend.unwatch(dir.path()).is_ok());
        }

        assert!(backend.watches.is_empty());
        assert!(backend.watch(dir.path()).is_ok());
    }

    #[test]
    fn unwatch_of_unknown_path_is_ok() {
        let dir = tempdir().unwrap();
        let mut backend = StdBackend::new_for_testing();

        assert!(backend.unwatch(dir.path()).is_ok());
    }

    #[test]
    fn data_modification_becomes_write() {
        let event = notify_event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/notes/a.txt"],
        );
        assert_eq!(
            StdBackend::convert_event(&event),
            vec![WatchEvent::Write(PathBuf::from("/notes/a.txt"))]
        );
    }

    #[test]
    fn metadata_and_access_are_ignored() {
        let metadata = notify_event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/notes/a.txt"],
        );
        assert!(StdBackend::convert_event(&metadata).is_empty());

        let access = notify_event(
            EventKind::Access(notify::event::AccessKind::Any),
            &["/notes/a.txt"],
        );
        assert!(StdBackend::convert_event(&access).is_empty());
    }

    #[test]
    fn atomic_save_rename_becomes_remove_and_create() {
        let event = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/notes/.a.txt.swp", "/notes/a.txt"],
        );
        assert_eq!(
            StdBackend::convert_event(&event),
            vec![
                WatchEvent::Remove(PathBuf::from("/notes/.a.txt.swp")),
                WatchEvent::Create(PathBuf::from("/notes/a.txt")),
            ]
        );
    }

    #[test]
    fn create_and_remove_map_directly() {
        let create = notify_event(EventKind::Create(CreateKind::File), &["/notes/a.txt"]);
        assert_eq!(
            StdBackend::convert_event(&create),
            vec![WatchEvent::Create(PathBuf::from("/notes/a.txt"))]
        );

        let remove = notify_event(EventKind::Remove(RemoveKind::File), &["/notes/a.txt"]);
        assert_eq!(
            StdBackend::convert_event(&remove),
            vec![WatchEvent::Remove(PathBuf::from("/notes/a.txt"))]
        );
    }

    #[test]
    fn watcher_critical_error_display() {
        let err = WatcherCriticalError::WatcherError {
            error: "test error".to_string(),
            path: Some(PathBuf::from("/test/path")),
        };
        assert_eq!(err.to_string(), "Watch error on /test/path: test error");
        assert!(WatcherCriticalError::RescanRequired
            .to_string()
            .contains("missed"));
        assert!(WatcherCriticalError::ChannelSendFailed("send failed".to_string())
            .to_string()
            .contains("send failed"));
    }
}
