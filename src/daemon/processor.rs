use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;
use watchfs::{WatchEvent, WatcherCriticalError};

use crate::daemon::{connection::ConnectionEvent, state::SyncState};

/// Owns the daemon's [`SyncState`] on a dedicated thread.
///
/// File change notifications and socket events arrive on separate channels
/// and are handled strictly one at a time, so the self-write suppression
/// check can never interleave with a write.
pub struct DaemonProcessor {
    /// Signaled on drop so the job thread leaves its loop.
    shutdown_sender: Sender<()>,

    /// Joined when dropped.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl DaemonProcessor {
    pub fn start(
        mut state: SyncState,
        watch_events: Receiver<WatchEvent>,
        connection_events: Receiver<ConnectionEvent>,
        critical_errors: Option<Receiver<WatcherCriticalError>>,
    ) -> std::io::Result<Self> {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let mut critical_errors = critical_errors;
        let no_errors = crossbeam_channel::never();

        let job_thread = jod_thread::Builder::new()
            .name("DaemonProcessor thread".to_owned())
            .spawn(move || {
                log::trace!("DaemonProcessor thread started");

                loop {
                    let errors = critical_errors.as_ref().unwrap_or(&no_errors);
                    let mut errors_closed = false;

                    select! {
                        recv(watch_events) -> event => {
                            state.handle_watch_event(event?);
                        },
                        recv(connection_events) -> event => {
                            state.handle_connection_event(event?);
                        },
                        recv(errors) -> err => match err {
                            Ok(WatcherCriticalError::RescanRequired) => {
                                state.on_rescan();
                            }
                            // The backend's error handler has logged these.
                            Ok(_) => {}
                            Err(_) => errors_closed = true,
                        },
                        recv(shutdown_receiver) -> _ => {
                            log::trace!("DaemonProcessor shutdown signal received...");
                            return Ok(());
                        },
                    }

                    if errors_closed {
                        critical_errors = None;
                    }
                }
            })?;

        Ok(Self {
            shutdown_sender,
            job_thread,
        })
    }
}

impl Drop for DaemonProcessor {
    fn drop(&mut self) {
        let _ = self.shutdown_sender.send(());
    }
}
