//! Event kinds, inbound events, and typed payload views.
//!
//! Every frame the server pushes carries a `kind` discriminator drawn from a
//! closed set. Frames are classified here; anything outside the set is
//! rejected so the dispatcher can log and drop it.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rentline_core::error::{RlError, RlResult};

use crate::subscriptions::RoomType;

/// Every event kind the client understands.
///
/// The first fifteen map 1:1 to server event names. `Connection` and
/// `QueueOverflow` are generated locally and never accepted from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A chat message was posted (`message:new`).
    #[serde(rename = "message:new")]
    MessageNew,
    /// A message was read by a participant (`message:read`).
    #[serde(rename = "message:read")]
    MessageRead,
    /// A participant started typing (`message:typing`).
    #[serde(rename = "message:typing")]
    MessageTyping,
    /// A participant stopped typing (`message:stop_typing`).
    #[serde(rename = "message:stop_typing")]
    MessageStopTyping,
    /// A guest requested a booking (`booking:request`).
    #[serde(rename = "booking:request")]
    BookingRequest,
    /// A booking was confirmed (`booking:confirmed`).
    #[serde(rename = "booking:confirmed")]
    BookingConfirmed,
    /// A booking was cancelled (`booking:cancelled`).
    #[serde(rename = "booking:cancelled")]
    BookingCancelled,
    /// A booking was changed (`booking:modified`).
    #[serde(rename = "booking:modified")]
    BookingModified,
    /// Property details changed (`property:updated`).
    #[serde(rename = "property:updated")]
    PropertyUpdated,
    /// Property availability changed (`property:availability`).
    #[serde(rename = "property:availability")]
    PropertyAvailability,
    /// A peer came online (`user:online`).
    #[serde(rename = "user:online")]
    UserOnline,
    /// A peer went offline (`user:offline`).
    #[serde(rename = "user:offline")]
    UserOffline,
    /// A server-side notification (`notification`).
    #[serde(rename = "notification")]
    Notification,
    /// A server error report, or a fatal local condition (`error`).
    #[serde(rename = "error")]
    Error,
    /// The server acknowledged a `join_room` (`room:joined`).
    #[serde(rename = "room:joined")]
    RoomJoined,
    /// Local: the connection state changed (`connection`).
    #[serde(rename = "connection")]
    Connection,
    /// Local: the offline queue evicted a command (`queue:overflow`).
    #[serde(rename = "queue:overflow")]
    QueueOverflow,
}

impl EventKind {
    /// Convert to the wire event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNew => "message:new",
            Self::MessageRead => "message:read",
            Self::MessageTyping => "message:typing",
            Self::MessageStopTyping => "message:stop_typing",
            Self::BookingRequest => "booking:request",
            Self::BookingConfirmed => "booking:confirmed",
            Self::BookingCancelled => "booking:cancelled",
            Self::BookingModified => "booking:modified",
            Self::PropertyUpdated => "property:updated",
            Self::PropertyAvailability => "property:availability",
            Self::UserOnline => "user:online",
            Self::UserOffline => "user:offline",
            Self::Notification => "notification",
            Self::Error => "error",
            Self::RoomJoined => "room:joined",
            Self::Connection => "connection",
            Self::QueueOverflow => "queue:overflow",
        }
    }

    /// All kinds, server-originated first.
    pub fn all() -> &'static [EventKind] {
        &[
            Self::MessageNew,
            Self::MessageRead,
            Self::MessageTyping,
            Self::MessageStopTyping,
            Self::BookingRequest,
            Self::BookingConfirmed,
            Self::BookingCancelled,
            Self::BookingModified,
            Self::PropertyUpdated,
            Self::PropertyAvailability,
            Self::UserOnline,
            Self::UserOffline,
            Self::Notification,
            Self::Error,
            Self::RoomJoined,
            Self::Connection,
            Self::QueueOverflow,
        ]
    }

    /// Whether this kind is only ever produced by the client itself.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Connection | Self::QueueOverflow)
    }

    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            Self::MessageNew | Self::MessageRead | Self::MessageTyping | Self::MessageStopTyping
        )
    }

    pub fn is_booking_event(&self) -> bool {
        matches!(
            self,
            Self::BookingRequest
                | Self::BookingConfirmed
                | Self::BookingCancelled
                | Self::BookingModified
        )
    }

    pub fn is_property_event(&self) -> bool {
        matches!(self, Self::PropertyUpdated | Self::PropertyAvailability)
    }

    pub fn is_presence_event(&self) -> bool {
        matches!(self, Self::UserOnline | Self::UserOffline)
    }
}

impl FromStr for EventKind {
    type Err = RlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RlError::MalformedFrame(format!("unknown event kind: {s}")))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified inbound event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// The frame's fields minus the `kind` discriminator.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Classify a raw text frame from the server.
    ///
    /// Fails with `MalformedFrame` for non-JSON input, non-object frames, a
    /// missing or unknown `kind`, or a kind that only the client may produce.
    pub fn from_frame(frame: &str) -> RlResult<Self> {
        let value: serde_json::Value = serde_json::from_str(frame)
            .map_err(|e| RlError::MalformedFrame(format!("unparseable frame: {e}")))?;

        let serde_json::Value::Object(mut fields) = value else {
            return Err(RlError::MalformedFrame("frame is not a JSON object".into()));
        };

        let kind = match fields.remove("kind") {
            Some(serde_json::Value::String(name)) => name.parse::<EventKind>()?,
            Some(_) => return Err(RlError::MalformedFrame("`kind` is not a string".into())),
            None => return Err(RlError::MalformedFrame("frame has no `kind`".into())),
        };

        if kind.is_local() {
            return Err(RlError::MalformedFrame(format!(
                "server may not send local kind {kind}"
            )));
        }

        Ok(Self {
            kind,
            payload: serde_json::Value::Object(fields),
            received_at: Utc::now(),
        })
    }

    /// Build a locally generated event.
    pub fn local(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Utc::now(),
        }
    }

    fn typed<T: DeserializeOwned>(&self, accept: bool) -> Option<T> {
        if accept {
            serde_json::from_value(self.payload.clone()).ok()
        } else {
            None
        }
    }

    pub fn as_new_message(&self) -> Option<MessageNewPayload> {
        self.typed(self.kind == EventKind::MessageNew)
    }

    pub fn as_message_read(&self) -> Option<MessageReadPayload> {
        self.typed(self.kind == EventKind::MessageRead)
    }

    /// Payload of either typing kind.
    pub fn as_typing(&self) -> Option<TypingPayload> {
        self.typed(matches!(
            self.kind,
            EventKind::MessageTyping | EventKind::MessageStopTyping
        ))
    }

    pub fn as_booking(&self) -> Option<BookingPayload> {
        self.typed(self.kind.is_booking_event())
    }

    pub fn as_property(&self) -> Option<PropertyPayload> {
        self.typed(self.kind.is_property_event())
    }

    pub fn as_presence(&self) -> Option<PresencePayload> {
        self.typed(self.kind.is_presence_event())
    }

    pub fn as_notification(&self) -> Option<NotificationPayload> {
        self.typed(self.kind == EventKind::Notification)
    }

    pub fn as_error(&self) -> Option<ErrorPayload> {
        self.typed(self.kind == EventKind::Error)
    }

    pub fn as_room_joined(&self) -> Option<RoomJoinedPayload> {
        self.typed(self.kind == EventKind::RoomJoined)
    }
}

/// `message:new`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNewPayload {
    pub room_id: String,
    pub message_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sent_at: Option<String>,
}

/// `message:read`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub room_id: String,
    pub message_id: String,
    pub reader_id: String,
}

/// `message:typing` / `message:stop_typing`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: String,
    pub user_id: String,
}

/// Any `booking:*` event. Fields beyond the identifiers vary per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPayload {
    pub booking_id: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Any `property:*` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPayload {
    pub property_id: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// `user:online` / `user:offline`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// `notification`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// `room:joined`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub room_id: String,
    pub room_type: RoomType,
}

/// Connection state of the realtime client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Initial open and handshake in progress.
    Connecting,
    /// Handshake done, frames flowing.
    Connected,
    /// Connection lost, retrying with backoff.
    Reconnecting,
    /// Retries exhausted or credentials rejected; needs an explicit `connect()`.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!("message:new".parse::<EventKind>().unwrap(), EventKind::MessageNew);
        assert_eq!(
            "property:availability".parse::<EventKind>().unwrap(),
            EventKind::PropertyAvailability
        );
        assert_eq!("room:joined".parse::<EventKind>().unwrap(), EventKind::RoomJoined);
        assert!(matches!(
            "message:deleted".parse::<EventKind>(),
            Err(RlError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_every_kind_has_a_distinct_name() {
        let names: std::collections::HashSet<_> =
            EventKind::all().iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), EventKind::all().len());
        for kind in EventKind::all() {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_event_kind_serializes_as_wire_name() {
        for kind in EventKind::all() {
            let value = serde_json::to_value(kind).unwrap();
            assert_eq!(value, kind.as_str());
            assert_eq!(serde_json::from_value::<EventKind>(value).unwrap(), *kind);
        }
        assert!(serde_json::from_str::<EventKind>(r#""MessageNew""#).is_err());
    }

    #[test]
    fn test_event_kind_categories() {
        assert!(EventKind::MessageTyping.is_message_event());
        assert!(EventKind::BookingModified.is_booking_event());
        assert!(!EventKind::BookingModified.is_message_event());
        assert!(EventKind::PropertyUpdated.is_property_event());
        assert!(EventKind::UserOffline.is_presence_event());
        assert!(EventKind::Connection.is_local());
        assert!(!EventKind::Error.is_local());
    }

    #[test]
    fn test_from_frame_strips_kind() {
        let event = InboundEvent::from_frame(
            r#"{"kind":"message:new","roomId":"conv-42","messageId":"m1","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::MessageNew);
        assert_eq!(
            event.payload,
            serde_json::json!({"roomId":"conv-42","messageId":"m1","content":"hi"})
        );

        let message = event.as_new_message().unwrap();
        assert_eq!(message.room_id, "conv-42");
        assert_eq!(message.content, "hi");
        assert!(message.sender_id.is_none());
    }

    #[test]
    fn test_from_frame_rejects_malformed_input() {
        for frame in [
            "not json",
            "[1,2,3]",
            r#"{"roomId":"x"}"#,
            r#"{"kind":7}"#,
            r#"{"kind":"message:exploded"}"#,
            r#"{"kind":"connection","state":"connected"}"#,
        ] {
            assert!(
                matches!(InboundEvent::from_frame(frame), Err(RlError::MalformedFrame(_))),
                "frame should be rejected: {frame}"
            );
        }
    }

    #[test]
    fn test_typed_access_checks_kind() {
        let event = InboundEvent::from_frame(
            r#"{"kind":"booking:confirmed","bookingId":"b7","propertyId":"p1","nights":3}"#,
        )
        .unwrap();
        let booking = event.as_booking().unwrap();
        assert_eq!(booking.booking_id, "b7");
        assert_eq!(booking.property_id.as_deref(), Some("p1"));
        assert_eq!(booking.details["nights"], 3);

        assert!(event.as_property().is_none());
        assert!(event.as_new_message().is_none());
    }

    #[test]
    fn test_presence_payload_parses_timestamp() {
        let event = InboundEvent::from_frame(
            r#"{"kind":"user:offline","userId":"u9","lastSeenAt":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let presence = event.as_presence().unwrap();
        assert_eq!(presence.user_id, "u9");
        assert_eq!(
            presence.last_seen_at.unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_room_joined_payload() {
        let event = InboundEvent::from_frame(
            r#"{"kind":"room:joined","roomId":"conv-42","roomType":"conversation"}"#,
        )
        .unwrap();
        let ack = event.as_room_joined().unwrap();
        assert_eq!(ack.room_type, RoomType::Conversation);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_value(ConnectionState::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }
}
