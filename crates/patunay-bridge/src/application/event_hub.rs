//! EventHub: per-channel publish/subscribe for outbound events.
//!
//! Every subscriber gets its own unbounded queue, so a slow consumer never
//! delays the bridge or other consumers.  A subscription covers either one
//! [`EventChannel`] or all of them.
//!
//! # Unsubscribing
//!
//! [`Subscription`] is the disposer: call [`Subscription::unsubscribe`] or
//! simply drop it.  Either way the entry is removed from the hub immediately
//! and nothing more is queued for it.  Unsubscribing never touches reader or
//! mode state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use patunay_core::{EventChannel, NfcEvent};
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    /// `None` means every channel.
    channel: Option<EventChannel>,
    tx: mpsc::UnboundedSender<NfcEvent>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Fan-out point for outbound events.  Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        lock_inner(&self.inner)
    }

    /// Subscribes to a single event channel.
    pub fn subscribe(&self, channel: EventChannel) -> Subscription {
        self.register(Some(channel))
    }

    /// Subscribes to every event channel, in emission order.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    fn register(&self, channel: Option<EventChannel>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber { id, channel, tx });
        Subscription {
            id,
            channel,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber of its channel.
    ///
    /// Subscribers whose receiving side is gone are pruned on the way.
    pub fn publish(&self, event: NfcEvent) {
        let channel = event.channel();
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| {
            if sub.channel.is_some_and(|c| c != channel) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
        trace!(%channel, subscribers = inner.subscribers.len(), "event published");
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

fn lock_inner(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live subscription.  Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    channel: Option<EventChannel>,
    rx: mpsc::UnboundedReceiver<NfcEvent>,
    hub: Weak<Mutex<HubInner>>,
}

impl Subscription {
    /// The channel this subscription covers, or `None` for all channels.
    pub fn channel(&self) -> Option<EventChannel> {
        self.channel
    }

    /// Waits for the next event.  Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<NfcEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<NfcEvent> {
        self.rx.try_recv().ok()
    }

    /// Stops delivery.  Events already queued are discarded.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn detach(&self) {
        if let Some(hub) = self.hub.upgrade() {
            lock_inner(&hub).subscribers.retain(|sub| sub.id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
