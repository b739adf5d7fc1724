//! Presence tracking derived from `user:online` / `user:offline` events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatcher::EventDispatcher;
use crate::events::{EventKind, InboundEvent};

/// Last known status of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// Read-only projection of presence events. Emits nothing itself.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    records: Arc<Mutex<HashMap<String, PresenceRecord>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PresenceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the tracker's listeners on `dispatcher`.
    pub fn attach(&self, dispatcher: &EventDispatcher) {
        for kind in [EventKind::UserOnline, EventKind::UserOffline] {
            let tracker = self.clone();
            dispatcher.on(kind, move |event| tracker.apply(event));
        }
    }

    /// Fold one presence event into the view. Last write wins.
    pub fn apply(&self, event: &InboundEvent) {
        let is_online = match event.kind {
            EventKind::UserOnline => true,
            EventKind::UserOffline => false,
            _ => return,
        };
        let Some(payload) = event.as_presence() else {
            warn!("ignoring {} without a userId", event.kind);
            return;
        };

        let record = PresenceRecord {
            last_seen_at: payload.last_seen_at.unwrap_or(event.received_at),
            user_id: payload.user_id,
            is_online,
        };
        debug!("presence: {} online={}", record.user_id, record.is_online);
        self.lock().insert(record.user_id.clone(), record);
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceRecord> {
        self.lock().get(user_id).cloned()
    }

    /// False for users never observed.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.lock().get(user_id).is_some_and(|r| r.is_online)
    }

    /// Ids of users currently online, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .lock()
            .values()
            .filter(|r| r.is_online)
            .map(|r| r.user_id.clone())
            .collect();
        users.sort();
        users
    }

    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(kind: &str, user: &str, seen: Option<&str>) -> InboundEvent {
        let mut value = json!({ "kind": kind, "userId": user });
        if let Some(seen) = seen {
            value["lastSeenAt"] = json!(seen);
        }
        InboundEvent::from_frame(&value.to_string()).unwrap()
    }

    #[test]
    fn test_online_then_offline() {
        let tracker = PresenceTracker::new();
        tracker.apply(&frame("user:online", "u2", None));
        assert!(tracker.is_online("u2"));

        tracker.apply(&frame("user:offline", "u2", Some("2026-10-01T12:00:00Z")));
        let record = tracker.get("u2").unwrap();
        assert!(!record.is_online);
        assert_eq!(record.last_seen_at.to_rfc3339(), "2026-10-01T12:00:00+00:00");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_unknown_user_is_offline() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online("nobody"));
        assert!(tracker.get("nobody").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_missing_user_id_is_ignored() {
        let tracker = PresenceTracker::new();
        tracker.apply(&InboundEvent::from_frame(r#"{"kind":"user:online"}"#).unwrap());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_other_kinds_are_ignored() {
        let tracker = PresenceTracker::new();
        tracker.apply(&InboundEvent::from_frame(r#"{"kind":"notification","userId":"u1"}"#).unwrap());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_attach_follows_dispatch() {
        let dispatcher = EventDispatcher::new(8);
        let tracker = PresenceTracker::new();
        tracker.attach(&dispatcher);

        dispatcher.dispatch(frame("user:online", "u3", None));
        dispatcher.dispatch(frame("user:online", "u1", None));
        dispatcher.dispatch(frame("user:offline", "u9", None));

        assert_eq!(tracker.online_users(), vec!["u1", "u3"]);
        let ids: Vec<_> = tracker.snapshot().into_iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec!["u1", "u3", "u9"]);

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
