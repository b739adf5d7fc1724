//! Rentline Realtime - event-synchronization client for the rental marketplace.
//!
//! This crate keeps the app's view of conversations, bookings and property
//! availability in step with the server over one persistent connection:
//! - Connection lifecycle with an explicit state machine
//! - Automatic reconnection with capped exponential backoff
//! - Room subscription tracking with replay after every reconnect
//! - Classification of inbound frames into a closed event taxonomy
//! - Synchronous fan-out to registered listeners, plus a broadcast feed
//! - Outbound command framing with a bounded offline queue
//! - Presence tracking derived from `user:online` / `user:offline`

pub mod commands;
pub mod dispatcher;
pub mod events;
pub mod manager;
pub mod presence;
pub mod sender;
pub mod subscriptions;
pub mod transport;
pub mod ws;

// Re-export key types
pub use commands::{BookingAction, CommandType, OutboundCommand, SendOutcome};
pub use dispatcher::{EventDispatcher, ListenerHandle};
pub use events::{
    BookingPayload, ConnectionState, ErrorPayload, EventKind, InboundEvent, MessageNewPayload,
    MessageReadPayload, NotificationPayload, PresencePayload, PropertyPayload, RoomJoinedPayload,
    TypingPayload,
};
pub use manager::{ClientConfig, RealtimeClient, ReconnectConfig, Session};
pub use presence::{PresenceRecord, PresenceTracker};
pub use subscriptions::{RoomType, Subscription};
pub use transport::{Handshake, Transport, TransportEvent, TransportLink};
pub use ws::WsTransport;
