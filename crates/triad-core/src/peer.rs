//! Per-computor session tasks
//!
//! One background task per configured endpoint owns the WebSocket for that
//! slot and its lifecycle:
//!
//! ```text
//! Connecting → Open → Closed → ReconnectPending → Connecting → …
//!                ↘ Terminated (explicit, no reconnect)
//! ```
//!
//! Reconnection is fixed-interval (no backoff). Requests registered with a
//! correlation key stay in an insertion-ordered replay buffer until settled,
//! and the whole buffer is retransmitted each time the socket reaches Open,
//! so a pending request survives any number of reconnects.
//! Fire-and-forget frames sent while the socket is down are queued and
//! flushed once on the next Open.
//!
//! A frame that fails to decode implies peer or protocol corruption; the
//! session closes the socket and lets the reconnect path clean up rather
//! than attempting partial-state recovery.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use indexmap::IndexMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::protocol::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands the core sends into a session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Transmit a frame. With a key the frame joins the replay buffer until
    /// settled; without one it is sent at most once (buffered while closed).
    Send {
        key: Option<String>,
        frame: String,
    },
    /// Remove a settled request from the replay buffer
    Settle { key: String },
    /// Terminate-and-reopen against a new endpoint iff it changed
    SetEndpoint { url: String },
    /// Close the socket and end the task; no close event, no reconnect
    Terminate,
}

/// What a session task reports back to the core
#[derive(Debug)]
pub(crate) enum SessionEventKind {
    /// Socket reached Open (replay already flushed)
    Opened,
    /// Socket closed; reconnect scheduled
    Closed,
    /// A decoded inbound frame, with its raw text for byte-exact comparison
    Inbound { raw: String, frame: Frame },
    /// Recoverable transport/protocol error
    Error { message: String },
}

/// A session event tagged with its computor slot
#[derive(Debug)]
pub(crate) struct SessionEvent {
    pub slot: usize,
    pub kind: SessionEventKind,
}

/// Handle the core keeps per slot
pub(crate) struct PeerHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    pub(crate) fn command(&self, command: SessionCommand) {
        let _ = self.command_tx.send(command);
    }

    /// Stop the task even if it is blocked mid-dial
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

enum Exit {
    /// Socket closed; run the reconnect path
    Closed,
    /// Endpoint changed; redial immediately without a close event
    Moved,
    /// Explicit terminate (or core dropped); end the task
    Terminated,
}

pub(crate) struct PeerSession {
    slot: usize,
    endpoint: String,
    reconnect_timeout: Duration,
    outstanding: IndexMap<String, String>,
    once_queue: Vec<String>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerSession {
    /// Spawn the session task for one computor slot
    pub(crate) fn spawn(
        slot: usize,
        endpoint: String,
        reconnect_timeout: Duration,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> PeerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session = PeerSession {
            slot,
            endpoint,
            reconnect_timeout,
            outstanding: IndexMap::new(),
            once_queue: Vec::new(),
            command_rx,
            event_tx,
        };
        let task = tokio::spawn(session.run());
        PeerHandle { command_tx, task }
    }

    async fn run(mut self) {
        loop {
            debug!(slot = self.slot, endpoint = %self.endpoint, "Dialing computor");
            match connect_async(self.endpoint.clone()).await {
                Ok((ws, _)) => {
                    self.emit(SessionEventKind::Opened);
                    match self.drive(ws).await {
                        Exit::Terminated => return,
                        Exit::Moved => continue,
                        Exit::Closed => self.emit(SessionEventKind::Closed),
                    }
                }
                Err(e) => {
                    warn!(slot = self.slot, error = %e, "Computor dial failed");
                    self.emit(SessionEventKind::Error {
                        message: e.to_string(),
                    });
                    self.emit(SessionEventKind::Closed);
                }
            }

            match self.wait_reconnect().await {
                Exit::Terminated => return,
                Exit::Moved | Exit::Closed => {}
            }
        }
    }

    /// Pump one open socket until it closes or the session ends
    async fn drive(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();

        // Replay every outstanding request, oldest first, then the
        // fire-and-forget frames queued while the socket was down.
        for frame in self.outstanding.values() {
            if sink.send(Message::Text(frame.clone())).await.is_err() {
                return Exit::Closed;
            }
        }
        for frame in std::mem::take(&mut self.once_queue) {
            if sink.send(Message::Text(frame)).await.is_err() {
                return Exit::Closed;
            }
        }

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    None | Some(SessionCommand::Terminate) => {
                        let _ = sink.close().await;
                        return Exit::Terminated;
                    }
                    Some(SessionCommand::Send { key, frame }) => {
                        if let Some(key) = key {
                            self.outstanding.insert(key, frame.clone());
                        }
                        if sink.send(Message::Text(frame)).await.is_err() {
                            return Exit::Closed;
                        }
                    }
                    Some(SessionCommand::Settle { key }) => {
                        self.outstanding.shift_remove(&key);
                    }
                    Some(SessionCommand::SetEndpoint { url }) => {
                        if url != self.endpoint {
                            debug!(slot = self.slot, endpoint = %url, "Endpoint replaced");
                            self.endpoint = url;
                            let _ = sink.close().await;
                            return Exit::Moved;
                        }
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => self.emit(SessionEventKind::Inbound { raw: text, frame }),
                        Err(e) => {
                            warn!(slot = self.slot, error = %e, "Malformed frame, recycling socket");
                            self.emit(SessionEventKind::Error {
                                message: e.to_string(),
                            });
                            let _ = sink.close().await;
                            return Exit::Closed;
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        warn!(slot = self.slot, "Unexpected binary frame, recycling socket");
                        self.emit(SessionEventKind::Error {
                            message: "Unexpected binary frame".to_string(),
                        });
                        let _ = sink.close().await;
                        return Exit::Closed;
                    }
                    Some(Ok(Message::Close(_))) | None => return Exit::Closed,
                    Some(Ok(_)) => {} // ping/pong handled by the protocol layer
                    Some(Err(e)) => {
                        self.emit(SessionEventKind::Error {
                            message: e.to_string(),
                        });
                        return Exit::Closed;
                    }
                },
            }
        }
    }

    /// Sit out the reconnect delay while staying responsive to commands
    async fn wait_reconnect(&mut self) -> Exit {
        let sleep = tokio::time::sleep(self.reconnect_timeout);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Exit::Closed,
                command = self.command_rx.recv() => match command {
                    None | Some(SessionCommand::Terminate) => return Exit::Terminated,
                    Some(SessionCommand::Send { key, frame }) => {
                        match key {
                            Some(key) => {
                                self.outstanding.insert(key, frame);
                            }
                            None => self.once_queue.push(frame),
                        }
                    }
                    Some(SessionCommand::Settle { key }) => {
                        self.outstanding.shift_remove(&key);
                    }
                    Some(SessionCommand::SetEndpoint { url }) => {
                        if url != self.endpoint {
                            self.endpoint = url;
                            return Exit::Moved;
                        }
                    }
                },
            }
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.event_tx.send(SessionEvent {
            slot: self.slot,
            kind,
        });
    }
}
