//! Connection manager.
//!
//! Owns the realtime connection state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected
//! Connecting --transient failure--> Reconnecting
//! Connected --transport closed--> Reconnecting
//! Reconnecting --retry ok--> Connected
//! Reconnecting --retry failed, attempts < max--> Reconnecting
//! Reconnecting --attempts >= max--> Failed
//! Connecting/Reconnecting --handshake rejected--> Failed
//! any --disconnect()--> Disconnected
//! ```
//!
//! Connection state, subscriptions and the offline queue share one mutex.
//! The lock is never held across an `.await` or while listeners run, so
//! listeners are free to call back into the client.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use rentline_core::config::{AppConfig, RealtimeConfig};
use rentline_core::constants;
use rentline_core::error::{RlError, RlResult};

use crate::commands::OutboundQueue;
use crate::dispatcher::{EventDispatcher, ListenerHandle};
use crate::events::{ConnectionState, EventKind, InboundEvent};
use crate::presence::PresenceTracker;
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{Handshake, Transport, TransportEvent, TransportLink};
use crate::ws::WsTransport;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Consecutive failed retries before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0). Jitter only ever lengthens a delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(constants::DEFAULT_BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(constants::DEFAULT_MAX_RECONNECT_DELAY_MS),
            max_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt + 1`.
    ///
    /// `min(base_delay * 2^attempt, max_delay)`, plus up to
    /// `jitter_factor` of that on top.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter_factor > 0.0 {
            exponential.mul_f64(1.0 + rand::random::<f64>() * self.jitter_factor)
        } else {
            exponential
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Everything the client needs besides the transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub handshake_timeout: Duration,
    pub queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_millis(constants::DEFAULT_HANDSHAKE_TIMEOUT_MS),
            queue_capacity: constants::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            event_channel_capacity: constants::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl From<&RealtimeConfig> for ClientConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            reconnect: ReconnectConfig {
                base_delay: config.base_reconnect_delay(),
                max_delay: config.max_reconnect_delay(),
                max_attempts: config.max_reconnect_attempts,
                jitter_factor: config.reconnect_jitter,
            },
            handshake_timeout: config.handshake_timeout(),
            queue_capacity: config.outbound_queue_capacity,
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

/// Parameters of the current `connect()` call.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub endpoint: String,
    pub auth_token: String,
    pub user_id: String,
}

impl Session {
    fn handshake(&self) -> Handshake {
        Handshake::new(self.auth_token.clone(), self.user_id.clone())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// A state transition waiting to be announced as a `connection` event.
#[derive(Debug)]
struct StateChange {
    from: ConnectionState,
    to: ConnectionState,
    attempt: u32,
    reason: Option<String>,
}

/// Mutable client state guarded by a single mutex.
#[derive(Debug)]
pub(crate) struct ClientState {
    pub(crate) connection: ConnectionState,
    pub(crate) attempt: u32,
    pub(crate) session: Option<Session>,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) queue: OutboundQueue,
    link: Option<mpsc::UnboundedSender<String>>,
    /// Bumped by every `connect()`/`disconnect()`; stale tasks compare
    /// against it before touching state.
    generation: u64,
    supervisor: Option<JoinHandle<()>>,
}

impl ClientState {
    /// Write a frame to the transport. Only succeeds while Connected.
    pub(crate) fn transmit(&mut self, frame: String) -> bool {
        if self.connection != ConnectionState::Connected {
            return false;
        }
        match &self.link {
            Some(link) => match link.send(frame) {
                Ok(()) => true,
                Err(_) => {
                    debug!("transport link closed under a send");
                    false
                }
            },
            None => false,
        }
    }
}

struct Shared {
    state: Mutex<ClientState>,
    dispatcher: EventDispatcher,
    presence: PresenceTracker,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.supervisor.take() {
            task.abort();
        }
    }
}

/// Realtime client handle. Clones share one connection.
///
/// Manages the full lifecycle of the connection:
/// - Handshake with a bounded timeout
/// - Automatic reconnection with exponential backoff (1s, 2s, 4s, ... max 30s)
/// - Room rejoin and offline-queue flush before a reconnect is announced
/// - Routing of inbound frames to the `EventDispatcher`
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Create a client over the given transport.
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_channel_capacity);
        let presence = PresenceTracker::new();
        presence.attach(&dispatcher);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let state = ClientState {
            connection: ConnectionState::Disconnected,
            attempt: 0,
            session: None,
            subscriptions: SubscriptionRegistry::default(),
            queue: OutboundQueue::new(config.queue_capacity),
            link: None,
            generation: 0,
            supervisor: None,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                dispatcher,
                presence,
                transport,
                config,
                state_tx,
            }),
        }
    }

    /// Create a client using the WebSocket transport and file configuration.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(Arc::new(WsTransport::new()), ClientConfig::from(config))
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the event dispatcher (for registering listeners).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on(kind, callback)
    }

    /// Remove a listener. Unknown handles are ignored.
    pub fn off(&self, kind: EventKind, handle: &ListenerHandle) -> bool {
        self.shared.dispatcher.off(kind, handle)
    }

    /// Online/last-seen view of peers.
    pub fn presence(&self) -> &PresenceTracker {
        &self.shared.presence
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Failed opens in the current Reconnecting cycle.
    pub fn attempt(&self) -> u32 {
        self.lock_state().attempt
    }

    pub fn session(&self) -> Option<Session> {
        self.lock_state().session.clone()
    }

    /// Open the connection and authenticate.
    ///
    /// Fails with `AlreadyConnected` while Connecting or Connected. A
    /// rejected handshake (`AuthFailed`) or an unusable endpoint (`Config`)
    /// leaves the client in Failed. Transient failures (including the handshake timeout) are
    /// returned as well, but the client keeps retrying in the background.
    pub async fn connect(&self, endpoint: &str, auth_token: &str, user_id: &str) -> RlResult<()> {
        let endpoint = AppConfig::sanitize_endpoint(endpoint);
        if endpoint.is_empty() {
            return Err(RlError::MissingConfig("realtime endpoint".into()));
        }

        let session = Session {
            endpoint,
            auth_token: auth_token.to_string(),
            user_id: user_id.to_string(),
        };

        let (generation, change) = {
            let mut state = self.lock_state();
            if matches!(
                state.connection,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!("already {}, skipping connect", state.connection);
                return Err(RlError::AlreadyConnected(state.connection.to_string()));
            }
            if let Some(task) = state.supervisor.take() {
                task.abort();
            }
            state.link = None;
            state.generation += 1;
            state.attempt = 0;
            state.session = Some(session.clone());
            let change = self.transition(&mut state, ConnectionState::Connecting, None);
            (state.generation, change)
        };
        self.announce(change);
        info!(
            "realtime connecting to {} as user {}",
            session.endpoint, session.user_id
        );

        match self.open(&session).await {
            Ok(link) => {
                let TransportLink { outbound, inbound } = link;
                let change = {
                    let mut state = self.lock_state();
                    if state.generation != generation {
                        info!("connect superseded before the handshake finished");
                        return Err(RlError::SocketDisconnected);
                    }
                    self.establish(&mut state, outbound)
                };
                self.announce(Some(change));
                self.spawn_supervisor(generation, Some(inbound));
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.fail_fatal(generation, &e);
                Err(e)
            }
            Err(e) => {
                warn!("initial connect failed: {e}");
                let change = {
                    let mut state = self.lock_state();
                    if state.generation != generation {
                        return Err(e);
                    }
                    // The failed open counts towards max_attempts.
                    state.attempt = 1;
                    self.transition(&mut state, ConnectionState::Reconnecting, Some(e.to_string()))
                };
                self.announce(change);
                self.spawn_supervisor(generation, None);
                Err(e)
            }
        }
    }

    /// Tear the connection down and stop reconnection attempts.
    ///
    /// Subscriptions and queued commands are kept for the next `connect()`;
    /// every subscription loses its confirmation. Idempotent.
    pub fn disconnect(&self) {
        let change = {
            let mut state = self.lock_state();
            state.generation += 1;
            if let Some(task) = state.supervisor.take() {
                task.abort();
            }
            // Dropping the sender closes the transport.
            state.link = None;
            state.session = None;
            state.attempt = 0;
            state.subscriptions.reset_confirmations();
            self.transition(&mut state, ConnectionState::Disconnected, None)
        };
        if change.is_some() {
            info!("realtime disconnected");
        }
        self.announce(change);
    }

    /// Open the transport, bounded by the handshake timeout.
    async fn open(&self, session: &Session) -> RlResult<TransportLink> {
        let handshake = session.handshake();
        let limit = self.shared.config.handshake_timeout;
        match timeout(limit, self.shared.transport.open(&session.endpoint, &handshake)).await {
            Ok(result) => result,
            Err(_) => Err(RlError::Timeout(format!(
                "handshake did not complete within {:.1}s",
                limit.as_secs_f64()
            ))),
        }
    }

    /// Switch to Connected on a fresh link: rejoin rooms, then flush the
    /// offline queue, all inside the caller's critical section.
    fn establish(
        &self,
        state: &mut ClientState,
        outbound: mpsc::UnboundedSender<String>,
    ) -> StateChange {
        state.link = Some(outbound);
        let from = state.connection;
        let attempt = state.attempt;
        state.connection = ConnectionState::Connected;
        state.attempt = 0;
        self.shared.state_tx.send_replace(ConnectionState::Connected);

        let rejoined = state.replay_subscriptions();
        let flushed = state.flush_queue();
        info!("realtime state: {from} -> connected (rejoined {rejoined}, flushed {flushed})");

        StateChange {
            from,
            to: ConnectionState::Connected,
            attempt,
            reason: None,
        }
    }

    fn transition(
        &self,
        state: &mut ClientState,
        to: ConnectionState,
        reason: Option<String>,
    ) -> Option<StateChange> {
        if state.connection == to {
            return None;
        }
        let from = state.connection;
        state.connection = to;
        self.shared.state_tx.send_replace(to);
        match &reason {
            Some(reason) => info!("realtime state: {from} -> {to} ({reason})"),
            None => info!("realtime state: {from} -> {to}"),
        }
        Some(StateChange {
            from,
            to,
            attempt: state.attempt,
            reason,
        })
    }

    /// Publish a state change through the dispatcher as a `connection` event.
    fn announce(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        let payload = serde_json::json!({
            "state": change.to,
            "previous": change.from,
            "attempt": change.attempt,
            "reason": change.reason,
        });
        self.shared
            .dispatcher
            .dispatch(InboundEvent::local(EventKind::Connection, payload));
    }

    /// Handshake rejected or endpoint unusable: stop for good and report once.
    fn fail_fatal(&self, generation: u64, err: &RlError) {
        let change = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.link = None;
            self.transition(&mut state, ConnectionState::Failed, Some(err.to_string()))
        };
        error!("realtime connection failed permanently: {err}");
        self.announce(change);
        self.shared.dispatcher.dispatch(InboundEvent::local(
            EventKind::Error,
            serde_json::json!({ "code": failure_code(err), "message": err.to_string() }),
        ));
    }

    /// Classify one inbound frame and hand it to the dispatcher.
    fn handle_frame(&self, frame: &str) {
        let Some(event) = self.shared.dispatcher.classify(frame) else {
            return;
        };
        if event.kind == EventKind::RoomJoined {
            match event.as_room_joined() {
                Some(ack) => self.confirm_room(&ack.room_id, ack.room_type),
                None => warn!("room:joined without a valid roomId/roomType"),
            }
        }
        self.shared.dispatcher.dispatch(event);
    }

    fn spawn_supervisor(
        &self,
        generation: u64,
        inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        let weak = Arc::downgrade(&self.shared);
        let task = tokio::spawn(supervise(weak, generation, inbound));

        let mut state = self.lock_state();
        if state.generation == generation {
            if let Some(previous) = state.supervisor.replace(task) {
                previous.abort();
            }
        } else {
            task.abort();
        }
    }

    /// Link lost while Connected: move to Reconnecting.
    ///
    /// Returns false when the link belonged to a superseded connection.
    fn begin_reconnect(&self, generation: u64, reason: String) -> bool {
        let change = {
            let mut state = self.lock_state();
            if state.generation != generation || state.connection != ConnectionState::Connected {
                return false;
            }
            state.link = None;
            state.attempt = 0;
            state.subscriptions.reset_confirmations();
            self.transition(&mut state, ConnectionState::Reconnecting, Some(reason))
        };
        self.announce(change);
        true
    }
}

fn failure_code(err: &RlError) -> &'static str {
    match err {
        RlError::AuthFailed(_) => "auth_failed",
        _ => "invalid_endpoint",
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<RealtimeClient> {
    weak.upgrade().map(|shared| RealtimeClient { shared })
}

/// Background task for one `connect()`: pumps inbound frames and, when the
/// link drops, runs the reconnect loop. Holds only a weak reference so a
/// dropped client stops it.
async fn supervise(
    weak: Weak<Shared>,
    generation: u64,
    mut inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
) {
    loop {
        if let Some(mut rx) = inbound.take() {
            let reason = pump(&weak, &mut rx).await;
            let Some(client) = upgrade(&weak) else {
                return;
            };
            warn!("realtime link lost: {reason}");
            if !client.begin_reconnect(generation, reason) {
                return;
            }
        }

        match reconnect(&weak, generation).await {
            Some(rx) => inbound = Some(rx),
            None => return,
        }
    }
}

/// Forward frames until the link closes. Returns the close reason.
async fn pump(weak: &Weak<Shared>, rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> String {
    while let Some(event) = rx.recv().await {
        let Some(client) = upgrade(weak) else {
            return "client dropped".into();
        };
        match event {
            TransportEvent::Frame(frame) => client.handle_frame(&frame),
            TransportEvent::Closed { reason } => {
                return reason.unwrap_or_else(|| "transport closed".into());
            }
        }
    }
    "transport ended without close".into()
}

/// Retry with exponential backoff until connected, failed, or cancelled.
///
/// Returns the new link's inbound stream on success.
async fn reconnect(
    weak: &Weak<Shared>,
    generation: u64,
) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
    let mut retries = 0u32;
    loop {
        let (delay, session, attempt) = {
            let client = upgrade(weak)?;
            let reconnect_config = &client.shared.config.reconnect;
            let mut state = client.lock_state();
            if state.generation != generation || state.connection != ConnectionState::Reconnecting {
                return None;
            }
            if reconnect_config.exhausted(state.attempt) {
                let reason = format!("gave up after {} attempt(s)", state.attempt);
                error!("max reconnection attempts ({}) reached", reconnect_config.max_attempts);
                let change = client.transition(&mut state, ConnectionState::Failed, Some(reason));
                drop(state);
                client.announce(change);
                return None;
            }
            let delay = reconnect_config.delay_for(retries);
            retries += 1;
            state.attempt += 1;
            (delay, state.session.clone()?, state.attempt)
        };

        warn!(
            "reconnection attempt {attempt} in {:.1}s",
            delay.as_secs_f64()
        );
        sleep(delay).await;

        let client = upgrade(weak)?;
        match client.open(&session).await {
            Ok(link) => {
                let TransportLink { outbound, inbound } = link;
                let change = {
                    let mut state = client.lock_state();
                    if state.generation != generation
                        || state.connection != ConnectionState::Reconnecting
                    {
                        info!("reconnect cancelled while the handshake was in flight");
                        return None;
                    }
                    client.establish(&mut state, outbound)
                };
                info!("reconnected after {attempt} attempt(s)");
                client.announce(Some(change));
                return Some(inbound);
            }
            Err(e) if e.is_fatal() => {
                client.fail_fatal(generation, &e);
                return None;
            }
            Err(e) => {
                error!("reconnection attempt {attempt} failed: {e}");
            }
        }
    }
}
