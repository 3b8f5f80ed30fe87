//! Client assembly
//!
//! [`Client`] is the entry point. It spawns one session task per computor,
//! a core task, and the outbox monitor:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Client (handle)                                                 │
//! │  ├── command channel ──► Core task                               │
//! │  │                       ├── SyncTracker (signed tick quorum)    │
//! │  │                       ├── Router (pending-request table)      │
//! │  │                       ├── first-open barrier                  │
//! │  │                       └── environment subscriptions           │
//! │  ├── PeerSession task × 3 (socket + replay buffer each)          │
//! │  ├── OutboxMonitor task (polls inclusion on full sync)           │
//! │  └── broadcast ClientEvent bus (subscribe())                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutable core state (tracker, pending table, barrier, subscriptions)
//! lives inside the core task and is only touched from there; the handle and
//! the monitor communicate with it by message passing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EVENT_CHANNEL_CAPACITY};
use crate::identity::ClientIdentity;
use crate::outbox::{Outbox, OutboxEntry};
use crate::peer::{PeerHandle, PeerSession, SessionCommand, SessionEvent, SessionEventKind};
use crate::protocol::{Frame, Request, StatusReport};
use crate::quorum::quorum_size;
use crate::router::{Router, RouterOutcome, Waiter};
use crate::sync::SyncTracker;
use crate::transfer::{build_transfer, BuiltTransfer, TransferDraft};
use crate::types::{Digest, COMPUTOR_COUNT, QUORUM_THRESHOLD};

/// Commands from the handle (and the monitor) into the core task
enum ClientCommand {
    /// Fan a request out to the computors. Routed requests carry a waiter;
    /// fire-and-forget submissions carry none.
    Execute {
        request: Request,
        waiter: Option<Waiter>,
    },
    /// Add an environment listener (first listener sends the subscribe frame)
    SubscribeEnvironment { digest: Digest },
    /// Drop an environment listener (last one sends the unsubscribe frame)
    UnsubscribeEnvironment { digest: Digest },
    /// Replace the endpoint of one computor slot
    SetEndpoint { slot: usize, url: String },
    /// Shut everything down
    Terminate,
}

struct EnvironmentState {
    listeners: usize,
    slots: [Option<Vec<u8>>; COMPUTOR_COUNT],
}

/// The quorum-replicating connection core.
///
/// Cheap to clone; all clones drive the same connections.
#[derive(Clone)]
pub struct Client {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    event_tx: broadcast::Sender<ClientEvent>,
    monitor_tx: mpsc::UnboundedSender<Digest>,
    endpoints: Arc<RwLock<Vec<String>>>,
    outbox: Outbox,
}

impl Client {
    /// Open the outbox, dial all computors, and start the background tasks.
    ///
    /// Connections are established asynchronously; requests issued before
    /// every computor has reached Open at least once are queued behind that
    /// barrier.
    pub async fn connect(config: ClientConfig) -> ClientResult<Client> {
        config.validate()?;
        let admin_key = config.admin_key()?;
        info!(
            computors = config.computors.len(),
            db_path = %config.db_path,
            "Starting triad client"
        );

        let outbox = Outbox::open(&config.db_path)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();

        let endpoints = Arc::new(RwLock::new(
            config
                .computors
                .iter()
                .map(|c| c.url.clone())
                .collect::<Vec<String>>(),
        ));
        let sessions: Vec<PeerHandle> = endpoints
            .read()
            .iter()
            .enumerate()
            .map(|(slot, url)| {
                PeerSession::spawn(
                    slot,
                    url.clone(),
                    config.reconnect_timeout(),
                    session_tx.clone(),
                )
            })
            .collect();

        let core = Core {
            sessions,
            endpoints: endpoints.clone(),
            opened_once: [false; COMPUTOR_COUNT],
            deferred: Vec::new(),
            tracker: SyncTracker::new(admin_key),
            router: Router::new(),
            environments: HashMap::new(),
            event_tx: event_tx.clone(),
            synchronization_interval: config.synchronization_interval(),
        };
        tokio::spawn(core.run(command_rx, session_rx));

        let monitor = OutboxMonitor {
            outbox: outbox.clone(),
            watched: outbox.digests()?,
            events: event_tx.subscribe(),
            event_tx: event_tx.clone(),
            command_tx: command_tx.clone(),
            additions: monitor_rx,
        };
        tokio::spawn(monitor.run());

        Ok(Client {
            command_tx,
            event_tx,
            monitor_tx,
            endpoints,
            outbox,
        })
    }

    /// Current endpoint URL of a computor slot
    pub fn endpoint(&self, slot: usize) -> Option<String> {
        self.endpoints.read().get(slot).cloned()
    }

    /// Subscribe to the client event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// The durable outbox shared with this client
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Fan a request out to all computors and await the quorum-agreed reply.
    ///
    /// Returns `Ok(None)` for fire-and-forget submissions (command 3).
    /// Concurrent calls with the same correlation key share one in-flight
    /// request and resolve to the same reply.
    pub async fn send_command(&self, request: Request) -> ClientResult<Option<Frame>> {
        if request.is_fire_and_forget() {
            self.command(ClientCommand::Execute {
                request,
                waiter: None,
            })?;
            return Ok(None);
        }

        let (waiter, receiver) = oneshot::channel();
        self.command(ClientCommand::Execute {
            request,
            waiter: Some(waiter),
        })?;
        let frame = receiver.await.map_err(|_| ClientError::Terminated)??;
        Ok(Some(frame))
    }

    /// Current nonce of an identity (command 1)
    pub async fn fetch_identity_nonce(&self, identity: &str) -> ClientResult<u32> {
        match self
            .send_command(Request::IdentityNonce {
                identity: identity.to_string(),
            })
            .await?
        {
            Some(Frame::IdentityNonce { identity_nonce, .. }) => Ok(identity_nonce),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Energy balance of an identity (command 2)
    pub async fn fetch_energy(&self, identity: &str) -> ClientResult<u64> {
        match self
            .send_command(Request::Energy {
                identity: identity.to_string(),
            })
            .await?
        {
            Some(Frame::Energy { energy, .. }) => Ok(energy),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Inclusion status of a submitted transfer (command 4)
    pub async fn query_status(&self, message_digest: Digest) -> ClientResult<StatusReport> {
        match self
            .send_command(Request::TransferStatus { message_digest })
            .await?
        {
            Some(Frame::TransferStatus(report)) => Ok(report),
            other => Err(unexpected_reply(other)),
        }
    }

    /// Build, journal, and submit a transfer.
    ///
    /// The pipeline fetches the sender's nonce and energy, validates the
    /// draft, writes the transfer to the outbox, and only then broadcasts
    /// the submission; a crash between the durable write and the send is
    /// retried by the monitor on the next launch. The returned digest keys
    /// the eventual `inclusion`/`rejection` event.
    pub async fn transfer(
        &self,
        sender: &ClientIdentity,
        recipient_identity: &str,
        energy: u64,
        effect_payload: Vec<u8>,
    ) -> ClientResult<Digest> {
        let identity = sender.identity();
        let identity_nonce = self.fetch_identity_nonce(&identity).await?;
        let available = self.fetch_energy(&identity).await?;
        if energy > available {
            return Err(ClientError::InsufficientEnergy {
                available,
                requested: energy,
            });
        }

        let BuiltTransfer {
            message_digest,
            message,
            signature,
        } = build_transfer(
            sender,
            &TransferDraft {
                recipient_identity: recipient_identity.to_string(),
                energy,
                identity_nonce,
                effect_payload,
            },
        )?;

        // Write-ahead: journal before any frame leaves the process.
        self.outbox
            .put(&message_digest, &OutboxEntry::new(&message, &signature))?;
        let _ = self.monitor_tx.send(message_digest);

        self.send_command(Request::SubmitTransfer { message, signature })
            .await?;
        info!(digest = %message_digest, energy, "Transfer submitted");
        Ok(message_digest)
    }

    /// Listen to an environment's data stream (command 5).
    ///
    /// Subscriptions are reference-counted per digest; the subscribe frame
    /// goes out for the first listener only, and stays in the replay buffers
    /// so a reconnecting computor re-subscribes automatically.
    pub fn subscribe_environment(&self, digest: Digest) -> ClientResult<()> {
        self.command(ClientCommand::SubscribeEnvironment { digest })
    }

    /// Drop one environment listener; the last one sends command 6
    pub fn unsubscribe_environment(&self, digest: Digest) -> ClientResult<()> {
        self.command(ClientCommand::UnsubscribeEnvironment { digest })
    }

    /// Replace the endpoint of slot `slot`; reconnects iff the URL changed
    pub fn set_endpoint(&self, slot: usize, url: String) -> ClientResult<()> {
        if slot >= COMPUTOR_COUNT {
            return Err(ClientError::Config(format!("No computor slot {}", slot)));
        }
        self.command(ClientCommand::SetEndpoint { slot, url })
    }

    /// Close all sockets and stop the background tasks.
    ///
    /// In-flight requests fail with [`ClientError::Terminated`]; nothing is
    /// replayed afterwards.
    pub fn terminate(&self) {
        let _ = self.command_tx.send(ClientCommand::Terminate);
    }

    fn command(&self, command: ClientCommand) -> ClientResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| ClientError::Terminated)
    }
}

fn unexpected_reply(frame: Option<Frame>) -> ClientError {
    ClientError::Serialization(format!("Unexpected reply shape: {:?}", frame))
}

// ════════════════════════════════════════════════════════════════════════
// Core task
// ════════════════════════════════════════════════════════════════════════

struct Core {
    sessions: Vec<PeerHandle>,
    endpoints: Arc<RwLock<Vec<String>>>,
    opened_once: [bool; COMPUTOR_COUNT],
    deferred: Vec<ClientCommand>,
    tracker: SyncTracker,
    router: Router,
    environments: HashMap<Digest, EnvironmentState>,
    event_tx: broadcast::Sender<ClientEvent>,
    synchronization_interval: Duration,
}

impl Core {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let mut watchdog = tokio::time::interval_at(
            tokio::time::Instant::now() + self.synchronization_interval,
            self.synchronization_interval,
        );
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    None | Some(ClientCommand::Terminate) => {
                        self.terminate();
                        return;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(event) = session_rx.recv() => self.handle_session_event(event),
                _ = watchdog.tick() => {
                    if let Some(event) = self
                        .tracker
                        .watchdog(self.synchronization_interval, Instant::now())
                    {
                        debug!("Watchdog demoted sync level");
                        self.emit(event);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: ClientCommand) {
        // Nothing request-shaped goes out until every computor has been Open
        // at least once; endpoint changes apply immediately.
        let gated = matches!(
            command,
            ClientCommand::Execute { .. }
                | ClientCommand::SubscribeEnvironment { .. }
                | ClientCommand::UnsubscribeEnvironment { .. }
        );
        if gated && !self.barrier_passed() {
            self.deferred.push(command);
            return;
        }
        self.apply(command);
    }

    fn apply(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Execute { request, waiter } => self.execute(request, waiter),
            ClientCommand::SubscribeEnvironment { digest } => self.subscribe_environment(digest),
            ClientCommand::UnsubscribeEnvironment { digest } => {
                self.unsubscribe_environment(digest)
            }
            ClientCommand::SetEndpoint { slot, url } => {
                self.endpoints.write()[slot] = url.clone();
                self.sessions[slot].command(SessionCommand::SetEndpoint { url });
            }
            ClientCommand::Terminate => self.terminate(),
        }
    }

    fn execute(&mut self, request: Request, waiter: Option<Waiter>) {
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(e) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(e));
                }
                return;
            }
        };

        if request.is_fire_and_forget() {
            self.broadcast(None, frame);
            return;
        }

        let key = request.correlation_key();
        let Some(waiter) = waiter else {
            warn!(%key, "Routed request without waiter dropped");
            return;
        };
        if self.router.register(key.clone(), waiter) {
            self.broadcast(Some(key), frame);
        }
        // else: coalesced onto the in-flight request, nothing to send
    }

    fn subscribe_environment(&mut self, digest: Digest) {
        let state = self
            .environments
            .entry(digest)
            .or_insert_with(|| EnvironmentState {
                listeners: 0,
                slots: Default::default(),
            });
        state.listeners += 1;
        if state.listeners > 1 {
            return;
        }

        let request = Request::SubscribeEnvironment {
            environment_digest: digest,
        };
        match request.encode() {
            Ok(frame) => self.broadcast(Some(request.correlation_key()), frame),
            Err(e) => warn!(error = %e, "Could not encode subscribe frame"),
        }
    }

    fn unsubscribe_environment(&mut self, digest: Digest) {
        let Some(state) = self.environments.get_mut(&digest) else {
            return;
        };
        state.listeners = state.listeners.saturating_sub(1);
        if state.listeners > 0 {
            return;
        }
        self.environments.remove(&digest);

        let subscribe_key = Request::SubscribeEnvironment {
            environment_digest: digest,
        }
        .correlation_key();
        self.settle(&subscribe_key);

        let request = Request::UnsubscribeEnvironment {
            environment_digest: digest,
        };
        match request.encode() {
            Ok(frame) => self.broadcast(None, frame),
            Err(e) => warn!(error = %e, "Could not encode unsubscribe frame"),
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let SessionEvent { slot, kind } = event;
        match kind {
            SessionEventKind::Opened => {
                self.emit(ClientEvent::PeerOpen {
                    slot,
                    endpoint: self.endpoints.read()[slot].clone(),
                });
                if !self.opened_once[slot] {
                    self.opened_once[slot] = true;
                    if self.barrier_passed() {
                        debug!("All computors open, flushing deferred commands");
                        for command in std::mem::take(&mut self.deferred) {
                            self.apply(command);
                        }
                    }
                }
            }
            SessionEventKind::Closed => {
                self.emit(ClientEvent::PeerClose {
                    slot,
                    endpoint: self.endpoints.read()[slot].clone(),
                });
            }
            SessionEventKind::Error { message } => {
                self.emit(ClientEvent::Error {
                    slot: Some(slot),
                    message,
                });
            }
            SessionEventKind::Inbound { raw, frame } => self.handle_frame(slot, raw, frame),
        }
    }

    fn handle_frame(&mut self, slot: usize, raw: String, frame: Frame) {
        match frame {
            Frame::TickInfo { status, signature } => {
                if let Some(event) =
                    self.tracker
                        .handle_tick_info(slot, status, &signature, Instant::now())
                {
                    self.emit(event);
                }
            }
            Frame::EnvironmentData {
                environment_digest,
                data,
            } => {
                let Some(state) = self.environments.get_mut(&environment_digest) else {
                    debug!(digest = %environment_digest, "Data for unsubscribed environment");
                    return;
                };
                state.slots[slot] = Some(raw.into_bytes());
                if quorum_size(&state.slots) >= QUORUM_THRESHOLD {
                    state.slots = Default::default();
                    self.emit(ClientEvent::EnvironmentData {
                        environment_digest,
                        data,
                    });
                }
            }
            Frame::UnsubscribeAck { .. } => {}
            other => {
                let Some(key) = other.correlation_key() else {
                    return;
                };
                match self.router.handle_reply(&key, slot, &raw, other) {
                    RouterOutcome::Resolved { frame, waiters } => {
                        self.settle(&key);
                        Router::resolve_waiters(waiters, &frame);
                    }
                    RouterOutcome::NoQuorum { waiters } => {
                        warn!(%key, "No quorum among computor replies");
                        self.settle(&key);
                        Router::reject_waiters(waiters);
                    }
                    RouterOutcome::Pending | RouterOutcome::Unmatched => {}
                }
            }
        }
    }

    fn barrier_passed(&self) -> bool {
        self.opened_once.iter().all(|open| *open)
    }

    /// Send a frame to every session. A key enrolls it in the replay buffers.
    fn broadcast(&self, key: Option<String>, frame: String) {
        for session in &self.sessions {
            session.command(SessionCommand::Send {
                key: key.clone(),
                frame: frame.clone(),
            });
        }
    }

    /// Remove a settled request from every session's replay buffer
    fn settle(&self, key: &str) {
        for session in &self.sessions {
            session.command(SessionCommand::Settle {
                key: key.to_string(),
            });
        }
    }

    fn terminate(&mut self) {
        info!("Terminating client");
        for session in &self.sessions {
            session.command(SessionCommand::Terminate);
            session.abort();
        }
        // Pending waiters observe Terminated through their dropped senders.
        self.router.clear();
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ════════════════════════════════════════════════════════════════════════
// Outbox monitor
// ════════════════════════════════════════════════════════════════════════

/// Watches journaled transfers and polls their status whenever the network
/// is observed fully synchronized (`syncStatus > 2`, i.e. all three agree).
struct OutboxMonitor {
    outbox: Outbox,
    watched: Vec<Digest>,
    events: broadcast::Receiver<ClientEvent>,
    event_tx: broadcast::Sender<ClientEvent>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    additions: mpsc::UnboundedReceiver<Digest>,
}

impl OutboxMonitor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) => {
                        let full_sync = event
                            .sync_status()
                            .map_or(false, |level| level > QUORUM_THRESHOLD);
                        if full_sync && self.poll_outstanding().await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Outbox monitor lagged behind events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                digest = self.additions.recv() => match digest {
                    Some(digest) => {
                        if !self.watched.contains(&digest) {
                            self.watched.push(digest);
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Query every watched digest once; errors other than termination keep
    /// the digest watched for the next sync transition.
    async fn poll_outstanding(&mut self) -> ClientResult<()> {
        for digest in self.watched.clone() {
            let report = match self.query(digest).await {
                Ok(report) => report,
                Err(ClientError::Terminated) => return Err(ClientError::Terminated),
                Err(e) => {
                    debug!(digest = %digest, error = %e, "Status query failed");
                    continue;
                }
            };

            if report.inclusion_state == Some(true) {
                // Delete before emitting: a crash after the delete loses only
                // the event, a crash before it replays the query next launch.
                if let Err(e) = self.outbox.delete(&digest) {
                    let _ = self.event_tx.send(ClientEvent::Error {
                        slot: None,
                        message: format!("Outbox eviction failed: {}", e),
                    });
                    continue;
                }
                self.watched.retain(|d| *d != digest);
                let _ = self.event_tx.send(ClientEvent::Inclusion {
                    message_digest: digest,
                    tick: report.tick.unwrap_or_default(),
                    epoch: report.epoch.unwrap_or_default(),
                });
            } else if let Some(reason) = report.reason {
                // The entry stays journaled and watched; later sync
                // transitions re-query and re-emit (source behavior).
                let _ = self.event_tx.send(ClientEvent::Rejection {
                    message_digest: digest,
                    reason,
                });
            }
        }
        Ok(())
    }

    async fn query(&self, message_digest: Digest) -> ClientResult<StatusReport> {
        let (waiter, receiver) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Execute {
                request: Request::TransferStatus { message_digest },
                waiter: Some(waiter),
            })
            .map_err(|_| ClientError::Terminated)?;
        match receiver.await.map_err(|_| ClientError::Terminated)?? {
            Frame::TransferStatus(report) => Ok(report),
            other => Err(unexpected_reply(Some(other))),
        }
    }
}
