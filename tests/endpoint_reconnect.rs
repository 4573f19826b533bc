mod fieldsync_test;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use futures::StreamExt;
use tokio::{net::TcpListener, time::timeout};

use libfieldsync::endpoint::{self, ConnectionState, EndpointConfig, MemoryField};

use fieldsync_test::serve_util::{TestDaemon, PATIENCE};

const DELAY: Duration = Duration::from_millis(200);

/// Accepts TCP connections and drops them straight away, counting each one.
/// Every accepted connection is one endpoint connection attempt.
async fn counting_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (url, attempts)
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_attempts_are_retried_once_per_delay() {
    let (url, attempts) = counting_listener().await;

    let (_handle, _task) = endpoint::spawn::<MemoryField>(EndpointConfig {
        url,
        reconnect_delay: DELAY,
    });

    tokio::time::sleep(DELAY * 5 + DELAY / 2).await;

    // One attempt right away, then one per delay. A little slack for slow
    // machines, but never a burst.
    let count = attempts.load(Ordering::SeqCst);
    assert!((3..=7).contains(&count), "made {} attempts", count);
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoint_connects_once_daemon_appears() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = reserved.local_addr().unwrap();
    drop(reserved);

    let (handle, _task) = endpoint::spawn::<MemoryField>(EndpointConfig {
        url: format!("ws://{}", address),
        reconnect_delay: DELAY,
    });

    tokio::time::sleep(DELAY * 2).await;
    assert_ne!(handle.status().borrow().connection, ConnectionState::Connected);

    // Start a daemon on the address the endpoint keeps trying.
    let daemon = TestDaemon::start_on(address).await;

    let started = Instant::now();
    let mut status = handle.status();
    timeout(
        PATIENCE,
        status.wait_for(|status| status.connection == ConnectionState::Connected),
    )
    .await
    .expect("endpoint never reconnected")
    .unwrap();

    assert!(started.elapsed() < DELAY * 5);

    drop(handle);
    daemon.stop().await;
}

/// Completes the websocket handshake on every connection. The first
/// `closed_connections` are closed by the server after `linger`; later ones
/// stay open until the client leaves.
async fn closing_server(closed_connections: usize, linger: Duration) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let number = counter.fetch_add(1, Ordering::SeqCst) + 1;

            tokio::spawn(async move {
                let Ok(mut websocket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };

                if number <= closed_connections {
                    tokio::time::sleep(linger).await;
                    let _ = websocket.close(None).await;
                }

                while let Some(Ok(_)) = websocket.next().await {}
            });
        }
    });

    (url, accepted)
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_connections_are_retried_once_per_delay() {
    let (url, accepted) = closing_server(usize::MAX, Duration::from_millis(20)).await;

    let (_handle, _task) = endpoint::spawn::<MemoryField>(EndpointConfig {
        url,
        reconnect_delay: DELAY,
    });

    tokio::time::sleep(DELAY * 5 + DELAY / 2).await;

    // Each cycle is the handshake, the linger, and one delay.
    let count = accepted.load(Ordering::SeqCst);
    assert!((2..=6).contains(&count), "made {} connections", count);
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoint_reconnects_after_established_connection_closes() {
    let (url, accepted) = closing_server(1, Duration::from_millis(100)).await;

    let (handle, _task) = endpoint::spawn::<MemoryField>(EndpointConfig {
        url,
        reconnect_delay: DELAY,
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut status = handle.status();
    let recorder = {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let connection = status.borrow_and_update().connection;
                seen.lock().unwrap().push(connection);
            }
        })
    };

    let started = Instant::now();
    timeout(PATIENCE, async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("endpoint never reconnected");
    assert!(started.elapsed() >= DELAY);

    let mut status = handle.status();
    timeout(
        PATIENCE,
        status.wait_for(|status| status.connection == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock().unwrap().clone();
    let expected = [
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
    ];
    let mut remaining = expected.iter().peekable();
    for state in &seen {
        if remaining.peek() == Some(&state) {
            remaining.next();
        }
    }
    assert!(
        remaining.peek().is_none(),
        "expected {:?} in order, saw {:?}",
        expected,
        seen
    );
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    drop(handle);
    recorder.abort();
}
