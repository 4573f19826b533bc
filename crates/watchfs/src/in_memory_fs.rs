use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};

use crate::{WatchBackend, WatchEvent};

/// In-memory filesystem that can be used as a `WatchFs` backend.
///
/// Cloning an `InMemoryFs` hands out another handle to the same files, so a
/// test can keep one handle to play the part of an external editor while a
/// `WatchFs` owns the other.
///
/// Every successful write to a path that is watched (directly, or through its
/// parent directory) raises a `WatchEvent::Write`, and creating a file raises
/// `WatchEvent::Create`, mirroring what `StdBackend` reports.
#[derive(Debug, Clone)]
pub struct InMemoryFs {
    inner: Arc<Mutex<InMemoryFsInner>>,
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFs {
    /// Create a new empty `InMemoryFs`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryFsInner::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryFsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes a file as if some other program had done it. Raises the same
    /// watch events as a write through the backend would.
    pub fn load_file<P: AsRef<Path>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> io::Result<()> {
        self.lock().write(path.as_ref(), contents.as_ref())
    }

    /// Removes a file as if some other program had done it.
    pub fn remove_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut inner = self.lock();
        let path = path.as_ref();

        if inner.files.remove(path).is_none() {
            return Err(not_found(path));
        }

        inner.raise(WatchEvent::Remove(path.to_path_buf()));
        Ok(())
    }

    /// Makes every subsequent write to `path` fail with `PermissionDenied`
    /// until turned off again.
    pub fn set_fail_writes<P: AsRef<Path>>(&self, path: P, fail: bool) {
        let mut inner = self.lock();
        let path = path.as_ref().to_path_buf();

        if fail {
            inner.failing_writes.insert(path);
        } else {
            inner.failing_writes.remove(&path);
        }
    }

    /// Makes every subsequent read of `path` fail with `PermissionDenied`
    /// until turned off again.
    pub fn set_fail_reads<P: AsRef<Path>>(&self, path: P, fail: bool) {
        let mut inner = self.lock();
        let path = path.as_ref().to_path_buf();

        if fail {
            inner.failing_reads.insert(path);
        } else {
            inner.failing_reads.remove(&path);
        }
    }

    /// Raises a watch event without touching any file contents. Useful for
    /// simulating duplicate or spurious notifications.
    pub fn raise_event(&self, event: WatchEvent) {
        let inner = self.lock();
        let _ = inner.event_sender.send(event);
    }

    /// Returns the current contents of a file, if it exists.
    pub fn contents<P: AsRef<Path>>(&self, path: P) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }
}

#[derive(Debug)]
struct InMemoryFsInner {
    files: HashMap<PathBuf, Vec<u8>>,
    watches: HashSet<PathBuf>,
    failing_writes: HashSet<PathBuf>,
    failing_reads: HashSet<PathBuf>,

    event_receiver: Receiver<WatchEvent>,
    event_sender: Sender<WatchEvent>,
}

impl InMemoryFsInner {
    fn new() -> Self {
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        Self {
            files: HashMap::new(),
            watches: HashSet::new(),
            failing_writes: HashSet::new(),
            failing_reads: HashSet::new(),
            event_receiver,
            event_sender,
        }
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.watches.contains(path)
            || path
                .parent()
                .map(|parent| self.watches.contains(parent))
                .unwrap_or(false)
    }

    fn raise(&self, event: WatchEvent) {
        if self.is_watched(event.path()) {
            let _ = self.event_sender.send(event);
        }
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        if self.failing_writes.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("write refused: {}", path.display()),
            ));
        }

        let existed = self
            .files
            .insert(path.to_path_buf(), data.to_vec())
            .is_some();

        if existed {
            self.raise(WatchEvent::Write(path.to_path_buf()));
        } else {
            self.raise(WatchEvent::Create(path.to_path_buf()));
        }

        Ok(())
    }
}

impl WatchBackend for InMemoryFs {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        let inner = self.lock();

        if inner.failing_reads.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("read refused: {}", path.display()),
            ));
        }

        inner.files.get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.lock().write(path, data)
    }

    fn exists(&mut self, path: &Path) -> io::Result<bool> {
        Ok(self.lock().files.contains_key(path))
    }

    fn canonicalize(&mut self, path: &Path) -> io::Result<PathBuf> {
        if self.lock().files.contains_key(path) {
            Ok(path.to_path_buf())
        } else {
            Err(not_found(path))
        }
    }

    fn event_receiver(&self) -> Receiver<WatchEvent> {
        self.lock().event_receiver.clone()
    }

    fn watch(&mut self, path: &Path) -> io::Result<()> {
        self.lock().watches.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        self.lock().watches.remove(path);
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("path {} not found", path.display()),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unwatched_writes_raise_nothing() {
        let imfs = InMemoryFs::new();
        let receiver = imfs.event_receiver();

        imfs.load_file("/a/b.txt", "x").unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn create_then_write_events() {
        let mut imfs = InMemoryFs::new();
        let receiver = imfs.event_receiver();
        imfs.watch(Path::new("/a")).unwrap();

        imfs.load_file("/a/b.txt", "x").unwrap();
        imfs.load_file("/a/b.txt", "y").unwrap();

        assert_eq!(
            receiver.try_recv().unwrap(),
            WatchEvent::Create(PathBuf::from("/a/b.txt"))
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            WatchEvent::Write(PathBuf::from("/a/b.txt"))
        );
    }

    #[test]
    fn failed_write_leaves_contents_and_raises_nothing() {
        let mut imfs = InMemoryFs::new();
        imfs.load_file("/a/b.txt", "before").unwrap();
        let receiver = imfs.event_receiver();
        imfs.watch(Path::new("/a")).unwrap();

        imfs.set_fail_writes("/a/b.txt", true);
        let err = imfs.write(Path::new("/a/b.txt"), b"after").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(imfs.contents("/a/b.txt").unwrap(), b"before");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn remove_raises_remove_event() {
        let mut imfs = InMemoryFs::new();
        imfs.load_file("/a/b.txt", "x").unwrap();
        let receiver = imfs.event_receiver();
        imfs.watch(Path::new("/a")).unwrap();

        imfs.remove_file("/a/b.txt").unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            WatchEvent::Remove(PathBuf::from("/a/b.txt"))
        );
        assert!(!imfs.exists(Path::new("/a/b.txt")).unwrap());
    }
}
