//! The listening endpoint the page connects to. Every request is expected to
//! be a websocket upgrade; each socket gets its own task that relays into the
//! daemon's processor thread.

mod socket;
mod util;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_tungstenite::{is_upgrade_request, upgrade};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::daemon::{ConnectionEvent, ConnectionIds};

use self::util::text_response;

const MAX_BIND_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

pub struct LiveServer {
    connection_events: Sender<ConnectionEvent>,
    connection_ids: Arc<ConnectionIds>,
}

impl LiveServer {
    pub fn new(connection_events: Sender<ConnectionEvent>) -> Self {
        LiveServer {
            connection_events,
            connection_ids: Arc::new(ConnectionIds::new()),
        }
    }

    /// Binds `address`, retrying a few times with backoff while the port is
    /// still held by a previous instance.
    pub async fn bind(address: SocketAddr) -> std::io::Result<TcpListener> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match TcpListener::bind(address).await {
                Ok(listener) => return Ok(listener),
                Err(err)
                    if err.kind() == std::io::ErrorKind::AddrInUse
                        && attempts < MAX_BIND_ATTEMPTS =>
                {
                    let delay = BASE_BACKOFF_MS * 2u64.pow(attempts - 1);
                    log::warn!(
                        "Port {} in use, retrying in {}ms (attempt {}/{})",
                        address.port(),
                        delay,
                        attempts,
                        MAX_BIND_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Accepts connections on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote) = match result {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            log::warn!("Failed to accept connection: {}", err);
                            continue;
                        }
                    };

                    log::trace!("Accepted TCP connection from {}", remote);
                    self.spawn_connection(TokioIo::new(stream));
                }
                _ = &mut shutdown => {
                    log::debug!("Listener shutting down");
                    break;
                }
            }
        }
    }

    fn spawn_connection(&self, io: TokioIo<tokio::net::TcpStream>) {
        let connection_events = self.connection_events.clone();
        let connection_ids = Arc::clone(&self.connection_ids);

        tokio::spawn(async move {
            let service = service_fn(move |mut request: Request<Incoming>| {
                let connection_events = connection_events.clone();
                let connection_ids = Arc::clone(&connection_ids);

                async move {
                    if !is_upgrade_request(&request) {
                        return Ok::<_, Infallible>(text_response(
                            StatusCode::BAD_REQUEST,
                            "fieldsync only accepts websocket connections, e.g. ws://localhost:8080",
                        ));
                    }

                    let (response, websocket) = match upgrade(&mut request, None) {
                        Ok(result) => result,
                        Err(err) => {
                            return Ok(text_response(
                                StatusCode::BAD_REQUEST,
                                format!("WebSocket upgrade failed: {}", err),
                            ));
                        }
                    };

                    let id = connection_ids.next();
                    tokio::spawn(async move {
                        if let Err(err) = socket::run(websocket, id, connection_events).await {
                            log::warn!("Connection {} ended with an error: {:#}", id, err);
                        }
                    });

                    Ok(response)
                }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                log::debug!("Error serving connection: {err}");
            }
        });
    }
}
