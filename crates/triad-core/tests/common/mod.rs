//! Shared test harness: in-process mock computors
//!
//! Each `MockComputor` is a real WebSocket server on a loopback port with a
//! scripted responder. Tests drive the client against three of them, push
//! server-initiated frames (signed tick broadcasts), and kick connections to
//! exercise the reconnect path.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async;
use triad_core::{ClientConfig, ClientEvent, ComputorEndpoint, TickStatus};

/// Scripted reply function: inbound frame text → response frames
pub type Responder = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

struct MockState {
    received: Mutex<Vec<String>>,
    responder: Mutex<Responder>,
    push_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
    connections: AtomicUsize,
}

/// One in-process computor
pub struct MockComputor {
    url: String,
    state: Arc<MockState>,
}

impl MockComputor {
    /// Start a mock computor with the given responder
    pub async fn spawn(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(4);
        let state = Arc::new(MockState {
            received: Mutex::new(Vec::new()),
            responder: Mutex::new(responder),
            push_tx,
            kick_tx,
            connections: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(stream, accept_state.clone()));
            }
        });

        Self {
            url: format!("ws://{}", addr),
            state,
        }
    }

    /// A computor that answers nothing (every request stays pending)
    pub async fn silent() -> Self {
        Self::spawn(Box::new(|_| Vec::new())).await
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Frames received so far, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().unwrap().clone()
    }

    /// How many frames carried the given command tag
    pub fn received_with_command(&self, command: u64) -> usize {
        self.received()
            .iter()
            .filter(|text| {
                serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v.get("command").and_then(|c| c.as_u64()))
                    == Some(command)
            })
            .count()
    }

    /// Total connections accepted (reconnects increment this)
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Replace the responder mid-test
    pub fn set_responder(&self, responder: Responder) {
        *self.state.responder.lock().unwrap() = responder;
    }

    /// Push a server-initiated frame to every live connection
    pub fn push(&self, frame: String) {
        let _ = self.state.push_tx.send(frame);
    }

    /// Drop every live connection (client will reconnect)
    pub fn kick(&self) {
        let _ = self.state.kick_tx.send(());
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<MockState>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let mut push_rx = state.push_tx.subscribe();
    let mut kick_rx = state.kick_tx.subscribe();

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    state.received.lock().unwrap().push(text.clone());
                    let replies = (*state.responder.lock().unwrap())(&text);
                    for reply in replies {
                        if sink.send(Message::Text(reply)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            frame = push_rx.recv() => {
                if let Ok(frame) = frame {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
            },
            _ = kick_rx.recv() => {
                let _ = sink.close().await;
                return;
            },
        }
    }
}

/// The admin keypair every test signs tick broadcasts with
pub fn admin_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// An admin-signed command-0 frame for the given network time
pub fn tick_frame(epoch: u32, tick: u16) -> String {
    let status = TickStatus { epoch, tick };
    let signature = admin_key().sign(&status.signed_bytes());
    serde_json::json!({
        "command": 0,
        "epoch": epoch,
        "tick": tick,
        "signature": BASE64.encode(signature.to_bytes()),
    })
    .to_string()
}

/// A command-0 frame signed by the wrong key
pub fn forged_tick_frame(epoch: u32, tick: u16) -> String {
    let status = TickStatus { epoch, tick };
    let forger = SigningKey::from_bytes(&[13u8; 32]);
    let signature = forger.sign(&status.signed_bytes());
    serde_json::json!({
        "command": 0,
        "epoch": epoch,
        "tick": tick,
        "signature": BASE64.encode(signature.to_bytes()),
    })
    .to_string()
}

/// Client config pointing at the three mocks, with a fast reconnect
pub fn test_config(mocks: &[MockComputor], temp: &TempDir) -> ClientConfig {
    config_with_interval(mocks, temp, 60_000)
}

/// Same, with a custom watchdog interval for sync tests
pub fn config_with_interval(
    mocks: &[MockComputor],
    temp: &TempDir,
    synchronization_interval_ms: u64,
) -> ClientConfig {
    ClientConfig {
        computors: mocks
            .iter()
            .map(|mock| ComputorEndpoint {
                url: mock.url(),
                options: None,
            })
            .collect(),
        admin_public_key: hex::encode(admin_key().verifying_key().to_bytes()),
        synchronization_interval_ms,
        reconnect_timeout_ms: 50,
        seed: None,
        index: 0,
        db_path: temp
            .path()
            .join("outbox.redb")
            .to_string_lossy()
            .into_owned(),
    }
}

/// Wait until every mock has at least `count` accepted connections
pub async fn await_connections(mocks: &[MockComputor], count: usize) {
    wait_until(
        || mocks.iter().all(|mock| mock.connection_count() >= count),
        Duration::from_secs(5),
    )
    .await;
    // Connections are counted at accept; give the handshakes a beat to finish
    // so pushed frames reach every subscriber.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Poll a condition until it holds or the timeout expires (panics on expiry)
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive events until one matches, with a timeout; returns the match
pub async fn next_matching(
    events: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    mut predicate: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("no matching event within {:?}", timeout));
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event bus closed"),
            Err(_) => panic!("no matching event within {:?}", timeout),
        }
    }
}

/// Assert that no event matching the predicate arrives within the window
pub async fn assert_no_matching(
    events: &mut broadcast::Receiver<ClientEvent>,
    window: Duration,
    mut predicate: impl FnMut(&ClientEvent) -> bool,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = match deadline.checked_duration_since(tokio::time::Instant::now()) {
            Some(remaining) => remaining,
            None => return,
        };
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                assert!(!predicate(&event), "unexpected event: {:?}", event);
            }
            Ok(Err(_)) | Err(_) => return,
        }
    }
}
