//! The task that owns the endpoint's websocket.
//!
//! Everything the page side does happens on this one task: commands from the
//! UI, frames from the daemon, the pending connection attempt, and the
//! reconnect timer. State changes are published on a watch channel.

use std::{future::pending, pin::Pin, time::Duration};

use futures::{future::BoxFuture, sink::SinkExt, stream::StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Sleep,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    endpoint::{ElementIdentity, EndpointError, SyncEndpoint, TextField, UnbindReason},
    protocol::{preview, SyncMessage},
};

pub const DEFAULT_URL: &str = "ws://localhost:8080";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Attempt = BoxFuture<'static, Result<Socket, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Connection lost: {0}")]
    Socket(#[from] tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What a status display needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointStatus {
    pub connection: ConnectionState,
    pub bound_element: Option<ElementIdentity>,
}

/// A one-shot timer that can be awaited in a `select!` loop. At most one
/// reconnect is ever scheduled at a time.
pub struct ReconnectTimer {
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, sleep: None }
    }

    /// Starts the timer unless it is already running. Returns whether a new
    /// timer was started.
    pub fn schedule(&mut self) -> bool {
        if self.sleep.is_some() {
            return false;
        }

        self.sleep = Some(Box::pin(tokio::time::sleep(self.delay)));
        true
    }

    pub fn clear(&mut self) {
        self.sleep = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the scheduled timer elapses, and never if none is
    /// scheduled. Safe to drop and call again.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

enum Command<E> {
    Bind(E),
    Unbind(UnbindReason),
    LocalEdit(String),
    Apply(String),
}

/// Handle to a running endpoint. The endpoint stops once every handle has
/// been dropped.
pub struct EndpointHandle<E> {
    commands: mpsc::UnboundedSender<Command<E>>,
    status: watch::Receiver<EndpointStatus>,
}

impl<E> Clone for EndpointHandle<E> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
        }
    }
}

impl<E: TextField> EndpointHandle<E> {
    /// Binds `element`. Elements that aren't text fields are refused here,
    /// before reaching the endpoint.
    pub fn bind(&self, element: E) -> Result<(), EndpointError> {
        let identity = element.identity();
        if !identity.is_text_field() {
            return Err(EndpointError::UnsupportedElement { identity });
        }

        self.send(Command::Bind(element))
    }

    pub fn unbind(&self, reason: UnbindReason) -> Result<(), EndpointError> {
        self.send(Command::Unbind(reason))
    }

    /// Reports a genuine user edit to the bound element.
    pub fn local_edit(&self, value: impl Into<String>) -> Result<(), EndpointError> {
        self.send(Command::LocalEdit(value.into()))
    }

    /// Applies a value to the bound element as if it came from the file.
    pub fn apply(&self, value: impl Into<String>) -> Result<(), EndpointError> {
        self.send(Command::Apply(value.into()))
    }

    pub fn status(&self) -> watch::Receiver<EndpointStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command<E>) -> Result<(), EndpointError> {
        self.commands
            .send(command)
            .map_err(|_| EndpointError::Stopped)
    }
}

/// Starts an endpoint on the current tokio runtime. It begins connecting
/// right away.
pub fn spawn<E: TextField>(config: EndpointConfig) -> (EndpointHandle<E>, JoinHandle<()>) {
    let (commands, command_receiver) = mpsc::unbounded_channel();
    let (status_sender, status) = watch::channel(EndpointStatus::default());

    let client = EndpointClient {
        timer: ReconnectTimer::new(config.reconnect_delay),
        url: config.url,
        endpoint: SyncEndpoint::new(),
        socket: None,
        attempt: None,
        status: status_sender,
    };

    let task = tokio::spawn(client.run(command_receiver));

    (EndpointHandle { commands, status }, task)
}

struct EndpointClient<E> {
    url: String,
    endpoint: SyncEndpoint<E>,
    socket: Option<Socket>,
    attempt: Option<Attempt>,
    timer: ReconnectTimer,
    status: watch::Sender<EndpointStatus>,
}

impl<E: TextField> EndpointClient<E> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<E>>) {
        self.connect();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                result = attempt_result(&mut self.attempt) => {
                    self.attempt = None;

                    match result {
                        Ok(socket) => self.on_open(socket),
                        Err(err) => {
                            log::warn!("{}", err);
                            self.on_close();
                        }
                    }
                }

                frame = next_frame(&mut self.socket) => self.handle_frame(frame),

                _ = self.timer.fired() => {
                    log::info!("Reconnecting to {}", self.url);
                    self.connect();
                }
            }
        }

        log::debug!("Endpoint stopping");
        self.endpoint.unbind(UnbindReason::Explicit);

        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }

    async fn handle_command(&mut self, command: Command<E>) {
        match command {
            Command::Bind(element) => match self.endpoint.bind(element) {
                Ok(initial) => {
                    self.publish_binding();
                    self.send(initial).await;
                }
                Err(err) => log::warn!("{}", err),
            },
            Command::Unbind(reason) => {
                if self.endpoint.unbind(reason) {
                    self.publish_binding();
                }
            }
            Command::LocalEdit(value) => {
                if let Some(message) = self.endpoint.on_local_edit(value) {
                    self.send(message).await;
                }
            }
            Command::Apply(value) => {
                self.endpoint.on_remote_update(&value);
            }
        }
    }

    fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        let message = match frame {
            Some(Ok(Message::Text(text))) => SyncMessage::decode(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => SyncMessage::decode_bytes(&bytes),
            Some(Ok(Message::Close(_))) | None => {
                log::info!("Daemon closed the connection");
                self.on_close();
                return;
            }
            Some(Ok(_)) => return,
            Some(Err(err)) => {
                log::warn!("{}", TransportError::from(err));
                self.on_close();
                return;
            }
        };

        match message {
            Ok(message) => {
                self.endpoint.on_remote_update(message.value());
            }
            Err(err) => log::warn!("Dropping message from daemon: {}", err),
        }
    }

    async fn send(&mut self, message: SyncMessage) {
        let Some(socket) = self.socket.as_mut() else {
            log::debug!("Not connected; dropping update {}", preview(message.value()));
            return;
        };

        if let Err(err) = socket.send(Message::text(message.encode())).await {
            log::warn!("{}", TransportError::from(err));
            self.on_close();
        }
    }

    /// Starts a connection attempt unless one is already in flight or open.
    fn connect(&mut self) {
        if self.attempt.is_some() || self.socket.is_some() {
            return;
        }

        self.publish_connection(ConnectionState::Connecting);
        log::debug!("Connecting to {}", self.url);

        let url = self.url.clone();
        self.attempt = Some(Box::pin(async move {
            match connect_async(url.as_str()).await {
                Ok((socket, _response)) => Ok(socket),
                Err(source) => Err(TransportError::Connect { url, source }),
            }
        }));
    }

    fn on_open(&mut self, socket: Socket) {
        self.timer.clear();
        self.socket = Some(socket);
        self.publish_connection(ConnectionState::Connected);
        log::info!("Connected to {}", self.url);
    }

    fn on_close(&mut self) {
        self.socket = None;
        self.publish_connection(ConnectionState::Disconnected);

        if self.timer.schedule() {
            log::info!(
                "Disconnected; retrying in {:.1}s",
                self.timer.delay.as_secs_f32()
            );
        }
    }

    fn publish_connection(&self, connection: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.connection == connection {
                return false;
            }
            status.connection = connection;
            true
        });
    }

    fn publish_binding(&self) {
        let bound_element = self.endpoint.bound_identity();
        self.status.send_if_modified(|status| {
            if status.bound_element == bound_element {
                return false;
            }
            status.bound_element = bound_element;
            true
        });
    }
}

async fn attempt_result(attempt: &mut Option<Attempt>) -> Result<Socket, TransportError> {
    match attempt {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}
