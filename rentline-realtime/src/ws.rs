//! WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use rentline_core::error::{RlError, RlResult};

use crate::transport::{parse_handshake_reply, Handshake, LinkPeer, Transport, TransportEvent, TransportLink};

/// Production transport: one WebSocket per open, JSON text frames.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str, handshake: &Handshake) -> RlResult<TransportLink> {
        let (stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| match e {
                // Retrying cannot fix the endpoint itself.
                WsError::Url(_) | WsError::HttpFormat(_) => {
                    RlError::Config(format!("unusable realtime endpoint {endpoint}: {e}"))
                }
                e => RlError::Socket(format!("connect to {endpoint} failed: {e}")),
            })?;
        let (mut write, mut read) = stream.split();

        write
            .send(Message::Text(handshake.to_frame()))
            .await
            .map_err(|e| RlError::Socket(format!("handshake send failed: {e}")))?;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    parse_handshake_reply(&text)?;
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    return Err(RlError::Socket("server closed during handshake".into()));
                }
                Some(Ok(_)) => {
                    return Err(RlError::MalformedFrame("non-text handshake reply".into()));
                }
                Some(Err(e)) => return Err(RlError::Socket(format!("handshake read failed: {e}"))),
                None => return Err(RlError::SocketDisconnected),
            }
        }
        info!("websocket open to {endpoint} as user {}", handshake.user_id);

        let (link, peer) = TransportLink::channel();
        let LinkPeer {
            mut outbound,
            inbound,
        } = peer;

        tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(TransportEvent::Frame(text)).is_err() {
                            // Client side went away; nobody to report to.
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        warn!("ignoring {} byte binary frame", bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("server closed: {}", f.reason))
                            .unwrap_or_else(|| "server closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("websocket error: {e}"),
                    None => break "websocket stream ended".to_string(),
                }
            };
            debug!("websocket reader finished: {reason}");
            let _ = inbound.send(TransportEvent::Closed {
                reason: Some(reason),
            });
        });

        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!("websocket write failed: {e}");
                    break;
                }
            }
            // Outbound sender dropped: the client asked to close.
            let _ = write.close().await;
            debug!("websocket writer finished");
        });

        Ok(link)
    }
}
