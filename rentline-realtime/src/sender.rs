//! Command sender: typed outbound commands and the offline queue.
//!
//! While Connected a command is written straight to the transport. Otherwise
//! queueable commands wait in a bounded FIFO that is flushed, in order, as
//! part of the next successful connect. Typing indicators are never queued.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use rentline_core::error::RlResult;

use crate::commands::{BookingAction, CommandType, OutboundCommand, SendOutcome};
use crate::events::{ConnectionState, EventKind, InboundEvent};
use crate::manager::{ClientState, RealtimeClient};

impl ClientState {
    /// Write queued commands to the transport, oldest first.
    ///
    /// Stops at the first failed write and keeps that command at the head.
    /// Returns the number of commands sent.
    pub(crate) fn flush_queue(&mut self) -> usize {
        let mut sent = 0;
        while let Some(command) = self.queue.pop_front() {
            if !self.transmit(command.to_frame()) {
                self.queue.push_front(command);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            info!("flushed {sent} queued command(s), {} left", self.queue.len());
        }
        sent
    }
}

impl RealtimeClient {
    /// Send a command now, or hold it until the next connect.
    ///
    /// Never blocks. Fails only when the payload cannot be framed.
    pub fn send(&self, command_type: CommandType, payload: Value) -> RlResult<SendOutcome> {
        let command = OutboundCommand::new(command_type, payload)?;

        let (outcome, capacity) = {
            let mut state = self.lock_state();
            let connected = state.connection == ConnectionState::Connected;

            if connected && state.queue.is_empty() && state.transmit(command.to_frame()) {
                debug!("sent {command_type} ({})", command.id);
                return Ok(SendOutcome::Sent);
            }

            if !command_type.is_queueable() {
                debug!("dropping {command_type} while {}", state.connection);
                return Ok(SendOutcome::Dropped);
            }

            let id = command.id;
            let evicted = state.queue.push(command);
            if connected {
                // Leftovers from a partial flush go first.
                state.flush_queue();
            }
            debug!(
                "queued {command_type} ({id}), {} pending while {}",
                state.queue.len(),
                state.connection
            );
            (SendOutcome::Queued { evicted }, state.queue.capacity())
        };

        if let SendOutcome::Queued {
            evicted: Some(evicted),
        } = &outcome
        {
            warn!(
                "outbound queue full ({capacity}), evicted {} ({})",
                evicted.command_type, evicted.id
            );
            self.dispatcher().dispatch(InboundEvent::local(
                EventKind::QueueOverflow,
                json!({
                    "evictedId": evicted.id.to_string(),
                    "evictedType": evicted.command_type,
                    "enqueuedAt": evicted.enqueued_at,
                    "capacity": capacity,
                }),
            ));
        }
        Ok(outcome)
    }

    /// Post a chat message to a conversation room.
    pub fn send_message(
        &self,
        room_id: &str,
        content: &str,
        message_type: &str,
        metadata: Option<Value>,
    ) -> RlResult<SendOutcome> {
        let mut payload = json!({
            "roomId": room_id,
            "content": content,
            "messageType": message_type,
        });
        if let (Some(metadata), Value::Object(fields)) = (metadata, &mut payload) {
            fields.insert("metadata".into(), metadata);
        }
        self.send(CommandType::SendMessage, payload)
    }

    pub fn mark_read(&self, message_id: &str, room_id: &str) -> RlResult<SendOutcome> {
        self.send(
            CommandType::MarkRead,
            json!({ "messageId": message_id, "roomId": room_id }),
        )
    }

    /// Typing indicator. Dropped unless Connected.
    pub fn start_typing(&self, room_id: &str) -> RlResult<SendOutcome> {
        self.send(CommandType::Typing, json!({ "roomId": room_id }))
    }

    pub fn stop_typing(&self, room_id: &str) -> RlResult<SendOutcome> {
        self.send(CommandType::StopTyping, json!({ "roomId": room_id }))
    }

    pub fn send_booking_action(
        &self,
        booking_id: &str,
        action: BookingAction,
        data: Value,
    ) -> RlResult<SendOutcome> {
        self.send(
            CommandType::BookingAction,
            json!({ "bookingId": booking_id, "action": action, "data": data }),
        )
    }

    pub fn update_availability(&self, property_id: &str, availability: Value) -> RlResult<SendOutcome> {
        self.send(
            CommandType::UpdateAvailability,
            json!({ "propertyId": property_id, "availability": availability }),
        )
    }

    /// Announce this user's own online status.
    pub fn update_presence(&self, is_online: bool) -> RlResult<SendOutcome> {
        self.send(CommandType::UpdateStatus, json!({ "isOnline": is_online }))
    }

    /// Number of commands waiting for a connection.
    pub fn queue_len(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Queued commands, oldest first.
    pub fn queued_commands(&self) -> Vec<OutboundCommand> {
        self.lock_state().queue.snapshot()
    }

    /// Discard every queued command. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let cleared = self.lock_state().queue.clear();
        if cleared > 0 {
            info!("cleared {cleared} queued command(s)");
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::manager::ClientConfig;
    use crate::ws::WsTransport;

    fn offline_client(capacity: usize) -> RealtimeClient {
        let config = ClientConfig {
            queue_capacity: capacity,
            ..ClientConfig::default()
        };
        RealtimeClient::new(Arc::new(WsTransport::new()), config)
    }

    #[test]
    fn test_offline_commands_are_queued_in_order() {
        let client = offline_client(10);
        client.send_message("conv-1", "first", "text", None).unwrap();
        client.mark_read("m1", "conv-1").unwrap();

        let queued = client.queued_commands();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].command_type, CommandType::SendMessage);
        assert_eq!(queued[0].payload["content"], "first");
        assert_eq!(queued[1].command_type, CommandType::MarkRead);
    }

    #[test]
    fn test_typing_is_dropped_offline() {
        let client = offline_client(10);
        assert_eq!(client.start_typing("conv-1").unwrap(), SendOutcome::Dropped);
        assert_eq!(client.stop_typing("conv-1").unwrap(), SendOutcome::Dropped);
        assert_eq!(client.queue_len(), 0);
    }

    #[test]
    fn test_overflow_evicts_oldest_and_emits_event() {
        let client = offline_client(2);
        let overflows = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = overflows.clone();
        client.on(EventKind::QueueOverflow, move |event| {
            seen.lock().unwrap().push(event.payload.clone());
        });

        let first = client.update_presence(true).unwrap();
        client.update_presence(false).unwrap();
        let third = client
            .update_availability("p-9", json!({"2026-11-01": false}))
            .unwrap();

        assert!(!first.overflowed());
        assert!(third.overflowed());
        let SendOutcome::Queued { evicted: Some(evicted) } = third else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted.payload, json!({"isOnline": true}));

        let overflows = overflows.lock().unwrap();
        assert_eq!(overflows.len(), 1);
        assert_eq!(overflows[0]["evictedType"], "update_status");
        assert_eq!(overflows[0]["capacity"], 2);
        assert_eq!(client.queue_len(), 2);
    }

    #[test]
    fn test_message_metadata_is_optional() {
        let client = offline_client(10);
        client.send_message("c", "hi", "text", None).unwrap();
        client
            .send_message("c", "pic", "image", Some(json!({"width": 640})))
            .unwrap();

        let queued = client.queued_commands();
        assert!(queued[0].payload.get("metadata").is_none());
        assert_eq!(queued[1].payload["metadata"]["width"], 640);
        assert_eq!(queued[1].payload["messageType"], "image");
    }

    #[test]
    fn test_booking_action_payload() {
        let client = offline_client(10);
        client
            .send_booking_action("b-7", BookingAction::Cancel, json!({"reason": "plans changed"}))
            .unwrap();
        let frame: Value = serde_json::from_str(&client.queued_commands()[0].to_frame()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "booking_action",
                "bookingId": "b-7",
                "action": "cancel",
                "data": {"reason": "plans changed"},
            })
        );
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        let client = offline_client(10);
        assert!(client.send(CommandType::MarkRead, json!([1, 2])).is_err());
        assert_eq!(client.queue_len(), 0);
    }

    #[test]
    fn test_clear_queue() {
        let client = offline_client(10);
        client.update_presence(true).unwrap();
        assert_eq!(client.clear_queue(), 1);
        assert_eq!(client.clear_queue(), 0);
    }
}
