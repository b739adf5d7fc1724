//! Event dispatcher: per-kind listener sets plus a broadcast feed.
//!
//! Listeners are plain callbacks registered for one `EventKind`. Each
//! dispatch pass snapshots the listener set for the event's kind, releases
//! the lock, then calls every listener once. Async consumers that would
//! rather pull events can `subscribe()` to a tokio broadcast channel that
//! receives every dispatched event after the listeners ran.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::events::{EventKind, InboundEvent};

/// A registered listener. Identity is the `Arc` allocation, so keep the
/// handle returned by [`EventDispatcher::on`] to remove it later.
pub type ListenerHandle = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

type ListenerMap = HashMap<EventKind, Vec<ListenerHandle>>;

fn same_listener(a: &ListenerHandle, b: &ListenerHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Clone)]
pub struct EventDispatcher {
    listeners: Arc<Mutex<ListenerMap>>,
    sender: broadcast::Sender<InboundEvent>,
}

impl EventDispatcher {
    /// Create a dispatcher whose broadcast feed buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            sender,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerMap> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for `kind` and return its handle.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let handle: ListenerHandle = Arc::new(callback);
        self.add(kind, handle.clone());
        handle
    }

    /// Register an existing handle for `kind`.
    ///
    /// Returns false when that exact handle is already registered for the
    /// kind; registering it again does nothing.
    pub fn add(&self, kind: EventKind, handle: ListenerHandle) -> bool {
        let mut listeners = self.lock();
        let set = listeners.entry(kind).or_default();
        if set.iter().any(|existing| same_listener(existing, &handle)) {
            return false;
        }
        set.push(handle);
        true
    }

    /// Remove a handle from `kind`. Returns false if it was not registered.
    pub fn off(&self, kind: EventKind, handle: &ListenerHandle) -> bool {
        let mut listeners = self.lock();
        let Some(set) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = set.len();
        set.retain(|existing| !same_listener(existing, handle));
        let removed = set.len() != before;
        if set.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Subscribe to every dispatched event.
    ///
    /// Slow receivers that fall behind get `RecvError::Lagged` and miss
    /// events; registered listeners are unaffected.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.sender.subscribe()
    }

    /// Number of live broadcast receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Classify a raw frame, logging and discarding anything malformed.
    pub fn classify(&self, frame: &str) -> Option<InboundEvent> {
        match InboundEvent::from_frame(frame) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                None
            }
        }
    }

    /// Deliver one event to every listener registered for its kind.
    ///
    /// Returns how many listeners ran to completion. A panicking listener is
    /// logged and skipped; the rest still receive the event.
    pub fn dispatch(&self, event: InboundEvent) -> usize {
        let snapshot: Vec<ListenerHandle> = self
            .lock()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for listener in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| (**listener)(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!("listener for {} panicked; continuing", event.kind),
            }
        }

        let kind = event.kind;
        let subscribers = self.sender.send(event).unwrap_or(0);
        debug!(
            "dispatched {kind} to {delivered}/{} listener(s), {subscribers} subscriber(s)",
            snapshot.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &InboundEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn new_message() -> InboundEvent {
        InboundEvent::local(
            EventKind::MessageNew,
            serde_json::json!({"roomId": "conv-42", "messageId": "m1", "content": "hi"}),
        )
    }

    #[test]
    fn test_same_handle_registered_twice_fires_once() {
        let dispatcher = EventDispatcher::new(8);
        let (count, callback) = counter();
        let handle = dispatcher.on(EventKind::MessageNew, callback);
        assert!(!dispatcher.add(EventKind::MessageNew, handle.clone()));

        assert_eq!(dispatcher.dispatch(new_message()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_handles_each_fire_once() {
        let dispatcher = EventDispatcher::new(8);
        let (count, _) = counter();
        let a = count.clone();
        let b = count.clone();
        dispatcher.on(EventKind::MessageNew, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.on(EventKind::MessageNew, move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(new_message());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_off_is_idempotent() {
        let dispatcher = EventDispatcher::new(8);
        let (count, callback) = counter();
        let handle = dispatcher.on(EventKind::MessageNew, callback);

        assert!(dispatcher.off(EventKind::MessageNew, &handle));
        assert!(!dispatcher.off(EventKind::MessageNew, &handle));
        assert!(!dispatcher.off(EventKind::BookingRequest, &handle));

        dispatcher.dispatch(new_message());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(EventKind::MessageNew), 0);
    }

    #[test]
    fn test_listeners_only_see_their_kind() {
        let dispatcher = EventDispatcher::new(8);
        let (count, callback) = counter();
        dispatcher.on(EventKind::BookingConfirmed, callback);

        dispatcher.dispatch(new_message());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let dispatcher = EventDispatcher::new(8);
        dispatcher.on(EventKind::MessageNew, |_| panic!("listener bug"));
        let (count, callback) = counter();
        dispatcher.on(EventKind::MessageNew, callback);

        assert_eq!(dispatcher.dispatch(new_message()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_during_dispatch_uses_snapshot() {
        let dispatcher = EventDispatcher::new(8);
        let (count, _) = counter();

        let inner_dispatcher = dispatcher.clone();
        let inner_count = count.clone();
        dispatcher.on(EventKind::MessageNew, move |_| {
            let c = inner_count.clone();
            inner_dispatcher.on(EventKind::MessageNew, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The listener added mid-pass must not run in the same pass.
        dispatcher.dispatch(new_message());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(EventKind::MessageNew), 2);
    }

    #[test]
    fn test_listener_may_remove_itself() {
        let dispatcher = EventDispatcher::new(8);
        let (count, _) = counter();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let inner_dispatcher = dispatcher.clone();
        let inner_slot = slot.clone();
        let inner_count = count.clone();
        let handle = dispatcher.on(EventKind::MessageNew, move |_| {
            inner_count.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = inner_slot.lock().unwrap().as_ref() {
                inner_dispatcher.off(EventKind::MessageNew, me);
            }
        });
        *slot.lock().unwrap() = Some(handle);

        dispatcher.dispatch(new_message());
        dispatcher.dispatch(new_message());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classify_drops_unknown_kind() {
        let dispatcher = EventDispatcher::new(8);
        assert!(dispatcher.classify(r#"{"kind":"property:demolished"}"#).is_none());
        assert!(dispatcher.classify("{{{").is_none());
        assert!(dispatcher
            .classify(r#"{"kind":"notification","notificationId":"n1"}"#)
            .is_some());
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_receives_events() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.dispatch(new_message());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::MessageNew);
        assert_eq!(event.payload["messageId"], "m1");
    }
}
