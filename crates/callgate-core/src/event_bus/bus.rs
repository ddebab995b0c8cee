use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::trace;

use super::types::{NetworkEvent, NetworkEventKind};
use crate::config::EventBusConfig;

type Callback = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

struct Inner {
    config: EventBusConfig,
    subscribers: Mutex<HashMap<NetworkEventKind, Vec<Subscriber>>>,
    /// Last emission instant per dedup key
    sent: Mutex<HashMap<String, Instant>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<NetworkEvent>,
}

/// Publish/subscribe bus for network status events.
///
/// Callbacks registered with [`EventBus::subscribe`] run synchronously inside
/// `publish`, in subscription order. Async observers can use
/// [`EventBus::stream`] instead; slow stream receivers miss events (lagged)
/// rather than blocking the publisher.
///
/// A publish carrying a dedup key is dropped when the same key was emitted
/// within the configured window.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("stream_receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a new EventBus.
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.stream_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                subscribers: Mutex::new(HashMap::new()),
                sent: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Register a callback for one event kind.
    ///
    /// The callback stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the handle does not remove it.
    pub fn subscribe<F>(&self, kind: NetworkEventKind, callback: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Receive every delivered event asynchronously.
    #[must_use]
    pub fn stream(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.sender.subscribe()
    }

    /// Publish an event.
    ///
    /// Returns how many callbacks and stream receivers got the event; 0 when it
    /// was suppressed as a duplicate or nobody is listening.
    pub fn publish(&self, event: NetworkEvent, dedup_key: Option<&str>) -> usize {
        if let Some(key) = dedup_key {
            if !self.record_emission(key) {
                trace!(key, kind = %event.kind(), "Duplicate event suppressed");
                return 0;
            }
        }

        // Snapshot so callbacks can publish or (un)subscribe re-entrantly
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind())
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            callback(&event);
        }

        // send() returns Err if there are no receivers, which is fine
        callbacks.len() + self.inner.sender.send(event).unwrap_or(0)
    }

    /// Number of callbacks registered for a kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: NetworkEventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Number of dedup keys currently remembered.
    #[must_use]
    pub fn dedup_records(&self) -> usize {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Returns false if `key` was emitted within the dedup window.
    fn record_emission(&self, key: &str) -> bool {
        let config = &self.inner.config;
        let now = Instant::now();
        let mut sent = self.inner.sent.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last) = sent.get(key) {
            if now.duration_since(*last) < config.dedup_window() {
                return false;
            }
        }
        sent.insert(key.to_string(), now);

        if sent.len() > config.history_limit {
            let mut by_age: Vec<(String, Instant)> =
                sent.iter().map(|(k, at)| (k.clone(), *at)).collect();
            by_age.sort_by_key(|(_, at)| *at);
            for (old, _) in by_age.into_iter().take(config.prune_count) {
                sent.remove(&old);
            }
        }

        true
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Inner>,
    kind: NetworkEventKind,
    id: u64,
}

impl Subscription {
    /// Kind this subscription listens to.
    #[must_use]
    pub fn kind(&self) -> NetworkEventKind {
        self.kind
    }

    /// Remove the callback from the bus.
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut subscribers = inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = subscribers.get_mut(&self.kind) {
            subs.retain(|s| s.id != self.id);
        }
    }
}
