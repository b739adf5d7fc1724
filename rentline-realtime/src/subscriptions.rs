//! Room subscriptions and their replay after reconnects.
//!
//! The registry records the rooms the caller wants to be in. A join is
//! only considered confirmed once the server acknowledges it with
//! `room:joined`; every reconnect clears confirmations and re-sends joins.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rentline_core::error::{RlError, RlResult};

use crate::events::ConnectionState;
use crate::manager::{ClientState, RealtimeClient};

/// Kind of room a client can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Conversation,
    Property,
    Booking,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Property => "property",
            Self::Booking => "booking",
        }
    }
}

impl FromStr for RoomType {
    type Err = RlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "property" => Ok(Self::Property),
            "booking" => Ok(Self::Booking),
            other => Err(RlError::InvalidPayload(format!("unknown room type: {other}"))),
        }
    }
}

impl std::fmt::Display for RoomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intended membership of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub room_id: String,
    pub room_type: RoomType,
    /// Server acknowledged the join since the last (re)connect.
    pub confirmed: bool,
}

/// Insertion-ordered set of subscriptions keyed by `(room_id, room_type)`.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    fn position(&self, room_id: &str, room_type: RoomType) -> Option<usize> {
        self.entries
            .iter()
            .position(|s| s.room_id == room_id && s.room_type == room_type)
    }

    /// Add the room, or reset its confirmation if already present.
    /// Returns true when the room was not registered before.
    pub(crate) fn upsert(&mut self, room_id: &str, room_type: RoomType) -> bool {
        match self.position(room_id, room_type) {
            Some(i) => {
                self.entries[i].confirmed = false;
                false
            }
            None => {
                self.entries.push(Subscription {
                    room_id: room_id.to_string(),
                    room_type,
                    confirmed: false,
                });
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, room_id: &str, room_type: RoomType) -> bool {
        match self.position(room_id, room_type) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Mark a join as acknowledged. Unknown rooms are ignored.
    pub(crate) fn confirm(&mut self, room_id: &str, room_type: RoomType) -> bool {
        match self.position(room_id, room_type) {
            Some(i) => {
                self.entries[i].confirmed = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn reset_confirmations(&mut self) {
        for entry in &mut self.entries {
            entry.confirmed = false;
        }
    }

    pub(crate) fn unconfirmed(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter().filter(|s| !s.confirmed)
    }

    pub(crate) fn contains(&self, room_id: &str, room_type: RoomType) -> bool {
        self.position(room_id, room_type).is_some()
    }

    pub(crate) fn snapshot(&self) -> Vec<Subscription> {
        self.entries.clone()
    }
}

/// `{"type": "join_room" | "leave_room", "roomId": ..., "roomType": ...}`
pub(crate) fn room_frame(command: &str, room_id: &str, room_type: RoomType) -> String {
    serde_json::json!({
        "type": command,
        "roomId": room_id,
        "roomType": room_type,
    })
    .to_string()
}

impl ClientState {
    /// Re-send `join_room` for every unconfirmed subscription.
    ///
    /// Returns the number of joins written to the transport.
    pub(crate) fn replay_subscriptions(&mut self) -> usize {
        let frames: Vec<String> = self
            .subscriptions
            .unconfirmed()
            .map(|s| room_frame("join_room", &s.room_id, s.room_type))
            .collect();

        let mut sent = 0;
        for frame in frames {
            if !self.transmit(frame) {
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            info!("replayed {sent} room join(s)");
        }
        sent
    }
}

impl RealtimeClient {
    /// Join a room, now if connected or on the next successful connect.
    ///
    /// Returns true when the join frame was sent immediately.
    pub fn join_room(&self, room_id: &str, room_type: RoomType) -> RlResult<bool> {
        if room_id.is_empty() {
            return Err(RlError::InvalidPayload("room id must not be empty".into()));
        }

        let mut state = self.lock_state();
        state.subscriptions.upsert(room_id, room_type);
        if state.connection != ConnectionState::Connected {
            debug!("join {room_type}:{room_id} pending until connected");
            return Ok(false);
        }
        Ok(state.transmit(room_frame("join_room", room_id, room_type)))
    }

    /// Leave a room. The subscription is dropped even while disconnected.
    ///
    /// Returns true when the room was subscribed.
    pub fn leave_room(&self, room_id: &str, room_type: RoomType) -> bool {
        let mut state = self.lock_state();
        if state.connection == ConnectionState::Connected {
            state.transmit(room_frame("leave_room", room_id, room_type));
        }
        state.subscriptions.remove(room_id, room_type)
    }

    /// Current subscriptions in join order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock_state().subscriptions.snapshot()
    }

    pub fn is_subscribed(&self, room_id: &str, room_type: RoomType) -> bool {
        self.lock_state().subscriptions.contains(room_id, room_type)
    }

    /// Record a `room:joined` acknowledgement.
    pub(crate) fn confirm_room(&self, room_id: &str, room_type: RoomType) {
        if !self.lock_state().subscriptions.confirm(room_id, room_type) {
            debug!("ack for unknown room {room_type}:{room_id} ignored");
        }
    }
}
