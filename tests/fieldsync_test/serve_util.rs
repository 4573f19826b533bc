#![allow(dead_code)]

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use tempfile::{tempdir, TempDir};
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use libfieldsync::{LiveServer, SyncDaemon, SyncMessage};
use watchfs::{StdBackend, WatchFs};

pub type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Long enough for a change to go through the watcher and its debouncer.
pub const SETTLE: Duration = Duration::from_millis(400);

/// Upper bound on waiting for something that should happen.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// A daemon syncing a file in a scratch directory, serving on an ephemeral
/// port. Everything is torn down on drop.
pub struct TestDaemon {
    _dir: TempDir,
    daemon: SyncDaemon,
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestDaemon {
    pub async fn start(initial: Option<&str>) -> Self {
        Self::start_with(initial, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Starts a daemon listening on a specific address.
    pub async fn start_on(address: SocketAddr) -> Self {
        Self::start_with(None, address).await
    }

    async fn start_with(initial: Option<&str>, address: SocketAddr) -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path().join("synced.txt");
        if let Some(contents) = initial {
            fs::write(&path, contents).unwrap();
        }

        let fs = WatchFs::new(StdBackend::new_for_testing());
        let daemon = SyncDaemon::start(fs, &path, None).unwrap();

        let listener = LiveServer::bind(address).await.unwrap();
        let address = listener.local_addr().unwrap();

        let (shutdown, shutdown_receiver) = oneshot::channel::<()>();
        let server = LiveServer::new(daemon.connection_sender());
        let server = tokio::spawn(server.serve(listener, async {
            let _ = shutdown_receiver.await;
        }));

        Self {
            _dir: dir,
            daemon,
            address,
            shutdown: Some(shutdown),
            server,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.address)
    }

    pub fn path(&self) -> &Path {
        self.daemon.path()
    }

    pub fn read(&self) -> String {
        fs::read_to_string(self.path()).unwrap()
    }

    /// Edits the file the way an external editor would.
    pub fn write(&self, contents: &str) {
        fs::write(self.path(), contents).unwrap();
    }

    pub async fn wait_for_file(&self, expected: &str) {
        let path: PathBuf = self.path().to_path_buf();
        let result = timeout(PATIENCE, async {
            loop {
                if fs::read_to_string(&path).ok().as_deref() == Some(expected) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        assert!(
            result.is_ok(),
            "file never contained {:?}, last saw {:?}",
            expected,
            self.read()
        );
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.url()).await.unwrap();

        // Let the socket task report the open to the daemon before the test
        // starts producing file changes.
        tokio::time::sleep(Duration::from_millis(100)).await;
        client
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.server).await;
    }
}

pub async fn send_update(client: &mut Client, value: &str) {
    client
        .send(Message::text(SyncMessage::update(value).encode()))
        .await
        .unwrap();
}

pub async fn send_raw(client: &mut Client, text: &str) {
    client.send(Message::text(text.to_owned())).await.unwrap();
}

/// Waits for the next sync message, skipping control frames.
pub async fn next_sync(client: &mut Client) -> SyncMessage {
    let message = timeout(PATIENCE, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return SyncMessage::decode(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended while waiting for a message: {:?}", other),
            }
        }
    })
    .await;

    message.expect("no message arrived in time")
}

/// Asserts that no payload arrives for `duration`.
pub async fn expect_silence(client: &mut Client, duration: Duration) {
    let result = timeout(duration, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                None | Some(Err(_)) => std::future::pending::<()>().await,
            }
        }
    })
    .await;

    if let Ok(text) = result {
        panic!("expected no message, got {}", text);
    }
}
