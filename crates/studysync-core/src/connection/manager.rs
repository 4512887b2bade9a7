use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::{
    ConnectionError, ConnectionState, ConnectionStateMachine, ConnectionStatus, Link, Transition, Transport,
};
use crate::config::ConnectionConfig;
use crate::protocol::{self, AckPayload, InboundEvent, OutboundEvent};
use crate::retry::compute_delay;

const COMMAND_BUFFER: usize = 64;

/// Broadcast stream of decoded inbound events.
pub type EventStream = broadcast::Receiver<InboundEvent>;

/// In-flight connect, already bounded by the connect timeout.
type ConnectAttempt = Pin<Box<dyn Future<Output = Result<Link, String>> + Send>>;

#[derive(Debug)]
enum Command {
    Emit {
        event: OutboundEvent,
        ack: Option<oneshot::Sender<AckPayload>>,
    },
    JoinRoom(String),
    LeaveRoom(String),
    RequestSnapshot(String),
    Network(bool),
    Retry(oneshot::Sender<Result<(), ConnectionError>>),
    Close,
}

/// Handle to the connection actor. Cheap to clone; every clone talks to the
/// same link, room table and event stream.
///
/// The actor task exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<InboundEvent>,
}

impl ConnectionManager {
    /// Start the actor and begin connecting immediately.
    pub fn spawn<T: Transport>(transport: T, config: ConnectionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let actor = Actor {
            transport: Arc::new(transport),
            config,
            machine: ConnectionStateMachine::default(),
            status: status_tx,
            events: event_tx.clone(),
            link: None,
            connecting: None,
            rooms: BTreeMap::new(),
            pending: HashMap::new(),
            next_ack: 1,
            attempt: 0,
            reconnect_at: None,
            last_error: None,
        };
        tokio::spawn(actor.run(command_rx));

        Self {
            commands: command_tx,
            status: status_rx,
            events: event_tx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribe to inbound events. Events received before subscribing are
    /// not replayed.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for(&self, state: ConnectionState) -> Result<ConnectionStatus, ConnectionError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| ConnectionError::Closed)?;
        Ok(status.clone())
    }

    /// Send an event without waiting for an acknowledgement.
    pub async fn emit(&self, event: OutboundEvent) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.send(Command::Emit { event, ack: None }).await
    }

    /// Send an event and get a receiver for the server's acknowledgement.
    ///
    /// The receiver errors if the link drops before the ack arrives.
    pub async fn emit_with_ack(&self, event: OutboundEvent) -> Result<oneshot::Receiver<AckPayload>, ConnectionError> {
        self.ensure_connected()?;
        let (tx, rx) = oneshot::channel();
        self.send(Command::Emit { event, ack: Some(tx) }).await?;
        Ok(rx)
    }

    /// Register interest in a room. The room is re-joined on every reconnect
    /// until every registration has been released with [`leave_room`](Self::leave_room).
    pub async fn join_room(&self, room_id: &str) -> Result<(), ConnectionError> {
        self.send(Command::JoinRoom(room_id.to_string())).await
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), ConnectionError> {
        self.send(Command::LeaveRoom(room_id.to_string())).await
    }

    /// Ask the server for a fresh presence snapshot of `room_id`.
    pub async fn request_snapshot(&self, room_id: &str) -> Result<(), ConnectionError> {
        self.send(Command::RequestSnapshot(room_id.to_string())).await
    }

    /// Report whether the network is reachable. Losing it moves the
    /// connection to offline; regaining it starts a reconnect.
    pub async fn set_network_available(&self, available: bool) -> Result<(), ConnectionError> {
        self.send(Command::Network(available)).await
    }

    /// Reconnect after an explicit close or an exhausted reconnect policy.
    pub async fn retry(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Retry(tx)).await?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Drop the link and stop reconnecting. Room registrations are kept.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.send(Command::Close).await
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        let state = self.state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected(state))
        }
    }

    async fn send(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConnectionError::Closed)
    }
}

/// Sole owner of the link, the room table and the pending acks.
struct Actor<T> {
    transport: Arc<T>,
    config: ConnectionConfig,
    machine: ConnectionStateMachine,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<InboundEvent>,
    link: Option<Link>,
    /// Raced against commands so close and network loss never wait on it.
    connecting: Option<ConnectAttempt>,
    /// Room id -> number of registrations.
    rooms: BTreeMap<String, usize>,
    pending: HashMap<u64, oneshot::Sender<AckPayload>>,
    next_ack: u64,
    attempt: u32,
    reconnect_at: Option<Instant>,
    last_error: Option<String>,
}

impl<T: Transport> Actor<T> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.publish();
        self.start_connect();

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                raw = next_frame(&mut self.link) => match raw {
                    Some(raw) => self.on_frame(&raw),
                    None => self.on_drop(),
                },
                result = next_attempt(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                _ = wait_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.attempt += 1;
                    self.publish();
                    self.start_connect();
                }
            }
        }
        tracing::debug!("connection manager stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Emit { event, ack } => self.emit(event, ack).await,
            Command::JoinRoom(room_id) => {
                *self.rooms.entry(room_id.clone()).or_insert(0) += 1;
                self.emit(OutboundEvent::JoinRoom { room_id }, None).await;
            }
            Command::LeaveRoom(room_id) => {
                let Some(count) = self.rooms.get_mut(&room_id) else {
                    tracing::debug!(room_id = %room_id, "leave for unregistered room ignored");
                    return;
                };
                *count -= 1;
                if *count == 0 {
                    self.rooms.remove(&room_id);
                    self.emit(OutboundEvent::LeaveRoom { room_id }, None).await;
                }
            }
            Command::RequestSnapshot(room_id) => {
                self.emit(OutboundEvent::JoinRoom { room_id }, None).await;
            }
            Command::Network(available) => self.on_network(available).await,
            Command::Retry(reply) => {
                if let Err(e) = self.machine.apply(Transition::Retry) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.attempt = 0;
                self.publish();
                let _ = reply.send(Ok(()));
                self.start_connect();
            }
            Command::Close => {
                if self.transition(Transition::Close) {
                    self.teardown_link();
                    self.connecting = None;
                    self.reconnect_at = None;
                    self.attempt = 0;
                    self.publish();
                }
            }
        }
    }

    async fn emit(&mut self, event: OutboundEvent, ack: Option<oneshot::Sender<AckPayload>>) {
        let Some(link) = self.link.as_ref() else {
            // Dropping `ack` tells the caller the event was never sent.
            tracing::debug!(event = event.name(), "no link; event not sent");
            return;
        };
        let mut frame = event.to_frame();
        // Callers that timed out have dropped their receivers.
        self.pending.retain(|_, tx| !tx.is_closed());
        let ack_id = ack.map(|tx| {
            let id = self.next_ack;
            self.next_ack += 1;
            self.pending.insert(id, tx);
            id
        });
        if let Some(id) = ack_id {
            frame = frame.with_ack(id);
        }
        if link.outbound.send(frame.encode()).await.is_err() {
            tracing::debug!(event = event.name(), "link closed while sending");
            if let Some(id) = ack_id {
                self.pending.remove(&id);
            }
        }
    }

    fn start_connect(&mut self) {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.connect_timeout();
        self.connecting = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, transport.connect()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("connect timed out after {}ms", timeout.as_millis())),
            }
        }));
    }

    async fn on_connect_result(&mut self, result: Result<Link, String>) {
        let error = match result {
            Ok(link) => {
                if !self.transition(Transition::Connected) {
                    return;
                }
                self.link = Some(link);
                tracing::info!(attempt = self.attempt, rooms = self.rooms.len(), "connected");
                self.attempt = 0;
                self.last_error = None;
                self.publish();
                self.rejoin_rooms().await;
                return;
            }
            Err(error) => error,
        };

        self.last_error = Some(error.clone());
        if self.attempt >= self.config.max_reconnect_attempts {
            self.transition(Transition::Exhausted);
            tracing::warn!(attempts = self.attempt, error = %error, "reconnect attempts exhausted");
        } else if self.transition(Transition::ConnectFailed) {
            let delay = self.schedule_reconnect();
            tracing::debug!(
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "connect failed; will retry"
            );
        }
        self.publish();
    }

    async fn rejoin_rooms(&mut self) {
        let rooms: Vec<String> = self.rooms.keys().cloned().collect();
        for room_id in rooms {
            tracing::debug!(room_id = %room_id, "re-joining room");
            self.emit(OutboundEvent::JoinRoom { room_id }, None).await;
        }
    }

    fn on_frame(&mut self, raw: &str) {
        match protocol::decode(raw) {
            InboundEvent::Ack { ack_id, payload } => match self.pending.remove(&ack_id) {
                Some(tx) => {
                    let _ = tx.send(payload);
                }
                None => tracing::debug!(ack_id, "ack for unknown or expired request"),
            },
            event => {
                match &event {
                    InboundEvent::Malformed(failure) => {
                        tracing::warn!(event = %failure.event, reason = %failure.reason, "malformed inbound event")
                    }
                    InboundEvent::ServerError { message } => {
                        tracing::warn!(message = %message, "server reported an error");
                        self.last_error = Some(message.clone());
                        self.publish();
                    }
                    InboundEvent::Unknown { event } => tracing::debug!(event = %event, "unhandled inbound event"),
                    _ => {}
                }
                let _ = self.events.send(event);
            }
        }
    }

    fn on_drop(&mut self) {
        self.teardown_link();
        if !self.transition(Transition::Dropped) {
            return;
        }
        tracing::warn!(rooms = self.rooms.len(), "connection lost; reconnecting");
        self.last_error = Some("connection lost".to_string());
        self.attempt = 0;
        self.schedule_reconnect();
        self.publish();
    }

    async fn on_network(&mut self, available: bool) {
        let state = self.machine.state();
        if available {
            if state == ConnectionState::Offline && self.transition(Transition::NetworkRestored) {
                tracing::info!("network restored; reconnecting");
                self.attempt = 0;
                self.reconnect_at = Some(Instant::now());
                self.publish();
            }
        } else if !matches!(state, ConnectionState::Offline | ConnectionState::Disconnected)
            && self.transition(Transition::NetworkLost)
        {
            tracing::warn!(previous = %state, "network unreachable; going offline");
            self.teardown_link();
            self.connecting = None;
            self.reconnect_at = None;
            self.publish();
        }
    }

    fn schedule_reconnect(&mut self) -> Duration {
        let delay = compute_delay(self.attempt, &self.config.backoff());
        self.reconnect_at = Some(Instant::now() + delay);
        delay
    }

    /// Drops the link and every pending ack sender with it.
    fn teardown_link(&mut self) {
        self.link = None;
        if !self.pending.is_empty() {
            tracing::debug!(pending = self.pending.len(), "dropping unacknowledged requests");
            self.pending.clear();
        }
    }

    fn transition(&mut self, transition: Transition) -> bool {
        let from = self.machine.state();
        match self.machine.apply(transition) {
            Ok(to) => {
                tracing::info!(from = %from, to = %to, transition = %transition, "connection state changed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignored invalid connection transition");
                false
            }
        }
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionStatus {
            state: self.machine.state(),
            reconnect_attempt: self.attempt,
            last_error: self.last_error.clone(),
        });
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_attempt(attempt: &mut Option<ConnectAttempt>) -> Result<Link, String> {
    match attempt {
        Some(attempt) => attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
