/*!
Filesystem access with change watching and swappable backends.

watchfs exists to serve [fieldsync](https://github.com/fieldsync/fieldsync),
which keeps one text file on disk in step with a field on a web page. The
daemon needs two things from the filesystem: whole-file reads and writes, and
a stream of notifications when the file changes underneath it.

## Backends
* `StdBackend`, which uses `std::fs` and the `notify` crate
* `InMemoryFs`, an in-memory filesystem whose writes raise watch events the
  same way the real watcher would, useful for deterministic tests
*/

mod in_memory_fs;
mod std_backend;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{io, str};

pub use in_memory_fs::InMemoryFs;
pub use std_backend::{CriticalErrorHandler, StdBackend, WatcherCriticalError};

mod sealed {
    use super::*;

    /// Sealing trait for WatchBackend.
    pub trait Sealed {}

    impl Sealed for StdBackend {}
    impl Sealed for InMemoryFs {}
}

/// Backend that can be used to create a `WatchFs`.
///
/// This trait is sealed and cannot not be implemented outside this crate.
pub trait WatchBackend: sealed::Sealed + Send + 'static {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()>;
    fn exists(&mut self, path: &Path) -> io::Result<bool>;
    fn canonicalize(&mut self, path: &Path) -> io::Result<PathBuf>;

    fn event_receiver(&self) -> crossbeam_channel::Receiver<WatchEvent>;

    /// Starts watching `path` and its direct children. Watching a path that
    /// is already covered is a no-op.
    fn watch(&mut self, path: &Path) -> io::Result<()>;
    fn unwatch(&mut self, path: &Path) -> io::Result<()>;
}

/// Represents an event that a filesystem can raise that might need to be
/// handled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WatchEvent {
    Create(PathBuf),
    Write(PathBuf),
    Remove(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Create(path) | WatchEvent::Write(path) | WatchEvent::Remove(path) => path,
        }
    }
}

/// A filesystem with a configurable backend.
///
/// All operations take a lock on the internal backend, so a `WatchFs` can be
/// shared between threads behind an `Arc`.
pub struct WatchFs {
    backend: Mutex<Box<dyn WatchBackend>>,
}

impl WatchFs {
    /// Creates a new `WatchFs` with the default backend, `StdBackend`.
    pub fn new_default() -> Self {
        Self::new(StdBackend::new())
    }

    /// Creates a new `WatchFs` with the default backend, also returning the
    /// critical error receiver for monitoring watcher health.
    pub fn new_default_with_errors() -> (Self, crossbeam_channel::Receiver<WatcherCriticalError>) {
        let backend = StdBackend::new();
        let error_rx = backend.critical_error_receiver();
        (Self::new(backend), error_rx)
    }

    /// Creates a new `WatchFs` with the given backend.
    pub fn new<B: WatchBackend>(backend: B) -> Self {
        Self {
            backend: Mutex::new(Box::new(backend)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn WatchBackend>> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Roughly equivalent to [`std::fs::read`].
    #[inline]
    pub fn read<P: AsRef<Path>>(&self, path: P) -> io::Result<Vec<u8>> {
        self.lock().read(path.as_ref())
    }

    /// Reads a whole file as UTF-8 text.
    ///
    /// Roughly equivalent to [`std::fs::read_to_string`]. Contents that are
    /// not valid UTF-8 produce an `InvalidData` error.
    pub fn read_to_string<P: AsRef<Path>>(&self, path: P) -> io::Result<String> {
        let path = path.as_ref();
        let contents = self.lock().read(path)?;

        String::from_utf8(contents).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("File was not valid UTF-8: {}", path.display()),
            )
        })
    }

    /// Replaces the whole contents of a file.
    ///
    /// Roughly equivalent to [`std::fs::write`].
    #[inline]
    pub fn write<P: AsRef<Path>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> io::Result<()> {
        self.lock().write(path.as_ref(), contents.as_ref())
    }

    /// Roughly equivalent to [`std::fs::exists`].
    #[inline]
    pub fn exists<P: AsRef<Path>>(&self, path: P) -> io::Result<bool> {
        self.lock().exists(path.as_ref())
    }

    /// Creates an empty file at `path` if nothing exists there yet. Returns
    /// whether a file was created. Existing contents are never touched.
    pub fn create_if_missing<P: AsRef<Path>>(&self, path: P) -> io::Result<bool> {
        let path = path.as_ref();
        let mut backend = self.lock();

        if backend.exists(path)? {
            return Ok(false);
        }

        backend.write(path, b"")?;
        Ok(true)
    }

    /// Roughly equivalent to [`std::fs::canonicalize`].
    #[inline]
    pub fn canonicalize<P: AsRef<Path>>(&self, path: P) -> io::Result<PathBuf> {
        self.lock().canonicalize(path.as_ref())
    }

    #[inline]
    pub fn watch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().watch(path.as_ref())
    }

    #[inline]
    pub fn unwatch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.lock().unwatch(path.as_ref())
    }

    /// Retrieve a handle to the event receiver for this `WatchFs`.
    #[inline]
    pub fn event_receiver(&self) -> crossbeam_channel::Receiver<WatchEvent> {
        self.lock().event_receiver()
    }
}
