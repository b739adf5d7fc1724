//! Shared test utilities for integration tests.
//!
//! `MockTransport` plays the server side of the handshake from a script and
//! hands every accepted connection to the test as a `ServerSide`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use rentline_core::error::{RlError, RlResult};
use rentline_realtime::{
    ClientConfig, ConnectionState, EventKind, Handshake, InboundEvent, RealtimeClient,
    ReconnectConfig, Transport, TransportEvent, TransportLink,
};

pub const ENDPOINT: &str = "ws://localhost:3000/realtime";

/// How the fake server answers one `open()`.
#[derive(Debug, Clone)]
pub enum Script {
    /// Accept the handshake.
    Accept,
    /// Transient failure (connection refused, reset, ...).
    Fail(&'static str),
    /// Reject the credentials.
    Reject(&'static str),
    /// The endpoint cannot be used at all (bad scheme, no TLS, ...).
    Invalid(&'static str),
    /// Never answer.
    Hang,
}

/// One call to `open()`.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub at: Instant,
    pub endpoint: String,
    pub handshake: Handshake,
}

/// The server end of one accepted connection.
pub struct ServerSide {
    pub handshake: Handshake,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerSide {
    /// Push one event frame to the client.
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, frame: &str) {
        self.inbound
            .send(TransportEvent::Frame(frame.to_string()))
            .expect("client side of the link is gone");
    }

    /// Simulate the connection dropping.
    pub fn close(&self) {
        let _ = self.inbound.send(TransportEvent::Closed {
            reason: Some("connection reset".into()),
        });
    }

    /// Every frame the client has written so far, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("client wrote invalid JSON"));
        }
        frames
    }

    /// Frames the client wrote, reduced to their `type` field.
    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// True once the client dropped its sender.
    pub fn is_closed_by_client(&mut self) -> bool {
        matches!(
            self.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

pub struct MockTransport {
    script: Mutex<VecDeque<Script>>,
    opens: Mutex<Vec<OpenRecord>>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MockTransport {
    /// Create a transport that answers opens in script order, then accepts.
    pub fn new(
        script: impl IntoIterator<Item = Script>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            opens: Mutex::new(Vec::new()),
            servers,
        });
        (transport, rx)
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Time between consecutive opens.
    pub fn gaps(&self) -> Vec<Duration> {
        let opens = self.opens();
        opens.windows(2).map(|w| w[1].at - w[0].at).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &str, handshake: &Handshake) -> RlResult<TransportLink> {
        self.opens.lock().unwrap().push(OpenRecord {
            at: Instant::now(),
            endpoint: endpoint.to_string(),
            handshake: handshake.clone(),
        });
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Accept);

        match step {
            Script::Accept => {
                let (link, peer) = TransportLink::channel();
                let _ = self.servers.send(ServerSide {
                    handshake: handshake.clone(),
                    outbound: peer.outbound,
                    inbound: peer.inbound,
                });
                Ok(link)
            }
            Script::Fail(reason) => Err(RlError::Socket(reason.to_string())),
            Script::Reject(reason) => Err(RlError::AuthFailed(reason.to_string())),
            Script::Invalid(reason) => Err(RlError::Config(reason.to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Client config with the default backoff and a small queue.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter_factor: 0.0,
        },
        handshake_timeout: Duration::from_secs(20),
        queue_capacity: 50,
        event_channel_capacity: 64,
    }
}

pub fn create_client(
    script: impl IntoIterator<Item = Script>,
    config: ClientConfig,
) -> (RealtimeClient, Arc<MockTransport>, mpsc::UnboundedReceiver<ServerSide>) {
    let (transport, servers) = MockTransport::new(script);
    let client = RealtimeClient::new(transport.clone(), config);
    (client, transport, servers)
}

/// Connect with the standard test credentials and return the server side.
pub async fn connect(
    client: &RealtimeClient,
    servers: &mut mpsc::UnboundedReceiver<ServerSide>,
) -> ServerSide {
    client
        .connect(ENDPOINT, "tok-1", "u1")
        .await
        .expect("connect failed");
    next_server(servers).await
}

/// Wait for the next accepted connection.
pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(Duration::from_secs(600), servers.recv())
        .await
        .expect("no connection accepted")
        .expect("transport dropped")
}

pub async fn wait_for_state(client: &RealtimeClient, want: ConnectionState) {
    let mut rx = client.state_receiver();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("never reached {want}, stuck in {}", client.state()))
        .expect("state channel closed");
}

/// Let spawned tasks process whatever is pending without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Record every event of `kind` the client dispatches.
pub fn record(client: &RealtimeClient, kind: EventKind) -> Arc<Mutex<Vec<InboundEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
    events
}

/// `state` field of every recorded `connection` event.
pub fn states(events: &Arc<Mutex<Vec<InboundEvent>>>) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.payload["state"].as_str().unwrap_or_default().to_string())
        .collect()
}
