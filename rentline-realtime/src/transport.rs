//! Transport seam between the connection manager and the physical socket.
//!
//! A `Transport` opens one bidirectional connection, performs the
//! authentication handshake, and hands back a `TransportLink`: an outbound
//! frame sender plus a stream of inbound frames ending in `Closed`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use rentline_core::error::{RlError, RlResult};

/// Credentials sent once per open.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub auth_token: String,
    pub user_id: String,
}

impl Handshake {
    pub fn new(auth_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            user_id: user_id.into(),
        }
    }

    /// `{"authToken": ..., "userId": ...}`
    pub fn to_frame(&self) -> String {
        serde_json::json!({
            "authToken": self.auth_token,
            "userId": self.user_id,
        })
        .to_string()
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("auth_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Interpret the server's reply to the handshake frame.
///
/// `{"kind":"authenticated"}` accepts. `{"kind":"unauthorized"}` or an
/// `error` carrying an auth code rejects with `AuthFailed`. Anything else is
/// a protocol failure the reconnection policy may retry.
pub fn parse_handshake_reply(frame: &str) -> RlResult<()> {
    const AUTH_CODES: &[&str] = &["unauthorized", "auth_failed", "invalid_token", "token_expired"];

    let reply: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| RlError::MalformedFrame(format!("unparseable handshake reply: {e}")))?;
    let message = reply
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("credentials rejected")
        .to_string();

    match reply.get("kind").and_then(|k| k.as_str()) {
        Some("authenticated") => Ok(()),
        Some("unauthorized") => Err(RlError::AuthFailed(message)),
        Some("error") => {
            let code = reply.get("code").and_then(|c| c.as_str()).unwrap_or_default();
            if AUTH_CODES.contains(&code) {
                Err(RlError::AuthFailed(message))
            } else {
                Err(RlError::Socket(format!("handshake error {code}: {message}")))
            }
        }
        Some(other) => Err(RlError::MalformedFrame(format!(
            "unexpected handshake reply kind: {other}"
        ))),
        None => Err(RlError::MalformedFrame("handshake reply has no `kind`".into())),
    }
}

/// What a transport reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame from the server.
    Frame(String),
    /// The connection is gone. Always the last event on a link.
    Closed { reason: Option<String> },
}

/// Client half of an open connection.
///
/// Dropping `outbound` asks the transport to close the connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport half of an open connection.
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportLink {
    /// Create a connected link/peer pair.
    pub fn channel() -> (TransportLink, LinkPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            LinkPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }
}

/// Opens physical connections for the connection manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint`, send the handshake, and wait for acceptance.
    ///
    /// Must return `AuthFailed` when the server rejects the credentials and
    /// a transient error (`Socket`, `SocketDisconnected`, `MalformedFrame`)
    /// for everything else. The caller applies the handshake timeout.
    async fn open(&self, endpoint: &str, handshake: &Handshake) -> RlResult<TransportLink>;
}
