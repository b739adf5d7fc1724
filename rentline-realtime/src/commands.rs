//! Outbound command types and the bounded offline queue.

use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentline_core::error::{RlError, RlResult};

/// Every command the client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SendMessage,
    MarkRead,
    Typing,
    StopTyping,
    BookingAction,
    UpdateAvailability,
    UpdateStatus,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::MarkRead => "mark_read",
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
            Self::BookingAction => "booking_action",
            Self::UpdateAvailability => "update_availability",
            Self::UpdateStatus => "update_status",
        }
    }

    pub fn all() -> &'static [CommandType] {
        &[
            Self::SendMessage,
            Self::MarkRead,
            Self::Typing,
            Self::StopTyping,
            Self::BookingAction,
            Self::UpdateAvailability,
            Self::UpdateStatus,
        ]
    }

    /// Whether the command is held while disconnected.
    ///
    /// Typing indicators are not: a stale "is typing" after a reconnect is
    /// worse than none.
    pub fn is_queueable(&self) -> bool {
        !matches!(self, Self::Typing | Self::StopTyping)
    }
}

impl FromStr for CommandType {
    type Err = RlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RlError::InvalidPayload(format!("unknown command type: {s}")))
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action carried by a `booking_action` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingAction {
    Confirm,
    Cancel,
    Modify,
    Request,
}

impl BookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Request => "request",
        }
    }
}

impl FromStr for BookingAction {
    type Err = RlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(Self::Confirm),
            "cancel" => Ok(Self::Cancel),
            "modify" => Ok(Self::Modify),
            "request" => Ok(Self::Request),
            other => Err(RlError::InvalidPayload(format!("unknown booking action: {other}"))),
        }
    }
}

impl std::fmt::Display for BookingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    /// Local id for log correlation; never sent.
    pub id: Uuid,
    pub command_type: CommandType,
    /// JSON object whose fields sit next to `type` in the frame.
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundCommand {
    /// Build a command, rejecting payloads that cannot be framed.
    pub fn new(command_type: CommandType, payload: serde_json::Value) -> RlResult<Self> {
        let serde_json::Value::Object(fields) = &payload else {
            return Err(RlError::InvalidPayload(format!(
                "{command_type} payload must be a JSON object"
            )));
        };
        if fields.contains_key("type") {
            return Err(RlError::InvalidPayload(format!(
                "{command_type} payload must not carry a `type` field"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            command_type,
            payload,
            enqueued_at: Utc::now(),
        })
    }

    /// `{"type": <command type>, ...payload}`
    pub fn to_frame(&self) -> String {
        let mut frame = serde_json::Map::new();
        frame.insert("type".into(), self.command_type.as_str().into());
        if let serde_json::Value::Object(fields) = &self.payload {
            for (key, value) in fields {
                frame.insert(key.clone(), value.clone());
            }
        }
        serde_json::Value::Object(frame).to_string()
    }
}

/// Result of a `send` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Written to the transport.
    Sent,
    /// Held for the next connect. `evicted` is the oldest command dropped
    /// to make room, if the queue was full.
    Queued { evicted: Option<OutboundCommand> },
    /// Not sent and not queued (typing indicators while disconnected).
    Dropped,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    /// The queue overflowed while handling this send.
    pub fn overflowed(&self) -> bool {
        matches!(self, Self::Queued { evicted: Some(_) })
    }
}

/// FIFO queue that evicts its oldest entry when full.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    items: VecDeque<OutboundCommand>,
    capacity: usize,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a command, returning the evicted oldest entry on overflow.
    pub(crate) fn push(&mut self, command: OutboundCommand) -> Option<OutboundCommand> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(command);
        evicted
    }

    pub(crate) fn pop_front(&mut self) -> Option<OutboundCommand> {
        self.items.pop_front()
    }

    /// Put a command back at the head after a failed flush.
    pub(crate) fn push_front(&mut self, command: OutboundCommand) {
        self.items.push_front(command);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    pub(crate) fn snapshot(&self) -> Vec<OutboundCommand> {
        self.items.iter().cloned().collect()
    }
}
