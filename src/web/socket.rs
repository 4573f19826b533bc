//! One websocket, relayed into the daemon's processor thread.

use crossbeam_channel::Sender;
use futures::{sink::SinkExt, stream::StreamExt};
use hyper_tungstenite::{tungstenite::Message, HyperWebsocket};
use tokio::sync::mpsc::unbounded_channel;

use crate::{
    daemon::{ConnectionEvent, ConnectionId},
    protocol::SyncMessage,
};

/// Runs a socket until either side closes it. The daemon always hears about
/// the open before any message and about the close after the last one.
pub async fn run(
    websocket: HyperWebsocket,
    id: ConnectionId,
    events: Sender<ConnectionEvent>,
) -> anyhow::Result<()> {
    let mut websocket = websocket.await?;
    let (outbox, mut inbox) = unbounded_channel::<SyncMessage>();

    if events.send(ConnectionEvent::Opened { id, outbox }).is_err() {
        log::debug!("Daemon stopped; closing connection {}", id);
        let _ = websocket.send(Message::Close(None)).await;
        return Ok(());
    }

    // The daemon drops our outbox once another connection replaces us. The
    // socket stays open so messages from this page are still applied.
    let mut inbox_open = true;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            outgoing = inbox.recv(), if inbox_open => match outgoing {
                Some(message) => {
                    if let Err(err) = websocket.send(Message::text(message.encode())).await {
                        break Err(err.into());
                    }
                }
                None => {
                    log::debug!("Connection {} was superseded", id);
                    inbox_open = false;
                }
            },

            incoming = websocket.next() => {
                let message = match incoming {
                    Some(Ok(Message::Text(text))) => SyncMessage::decode(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => SyncMessage::decode_bytes(&bytes),
                    Some(Ok(Message::Close(_))) | None => {
                        log::debug!("Connection {} closed by client", id);
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(err)) => break Err(err.into()),
                };

                match message {
                    Ok(message) => {
                        if events.send(ConnectionEvent::Message { id, message }).is_err() {
                            break Ok(());
                        }
                    }
                    Err(err) => log::warn!("Dropping message from {}: {}", id, err),
                }
            }
        }
    };

    let _ = events.send(ConnectionEvent::Closed { id });
    result
}
