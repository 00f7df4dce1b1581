//! Notificator Update Bus
//!
//! In-process pub/sub that fans interaction events out to streaming
//! subscribers, partitioned by alert fingerprint. A topic is an alert key;
//! each subscriber owns a bounded FIFO plus a wakeup.
//!
//! Back-pressure is drop-and-signal: a publish never blocks, and a full
//! subscriber buffer is flushed down to a single `LAGGED` sentinel telling
//! that one client to reconcile by re-querying. Other subscribers of the same
//! topic are unaffected.
//!
//! Per-key ordering is the caller's contract: the interaction store holds a
//! per-alert-key mutex across commit + publish, so events enter each queue in
//! commit order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use notificator_core::{AlertUpdate, Error, Result};

/// Default per-subscriber buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Default grace period between `SERVER_STOPPING` and forced close.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Pub/sub hub shared by the interaction store and the streaming endpoint.
pub struct UpdateBus {
    state: RwLock<BusState>,
    next_id: AtomicU64,
    capacity: usize,
}

struct BusState {
    draining: bool,
    topics: HashMap<String, Vec<Arc<SubscriberShared>>>,
}

struct SubscriberShared {
    id: u64,
    alert_key: String,
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
}

struct SubscriberQueue {
    buffer: VecDeque<AlertUpdate>,
    closed: bool,
}

impl SubscriberShared {
    /// Enqueues without blocking; overflow flushes the buffer down to one
    /// `LAGGED` sentinel.
    fn offer(&self, update: AlertUpdate, capacity: usize) {
        {
            let mut queue = self.queue.lock();
            if queue.closed {
                return;
            }
            if queue.buffer.len() >= capacity {
                debug!(
                    target: "bus",
                    subscriber = self.id,
                    alert_key = %self.alert_key,
                    "subscriber lagged; flushing buffer"
                );
                queue.buffer.clear();
                queue.buffer.push_back(AlertUpdate::lagged(&self.alert_key));
            } else {
                queue.buffer.push_back(update);
            }
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        {
            let mut queue = self.queue.lock();
            queue.closed = true;
        }
        self.notify.notify_one();
    }
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// A bus whose subscriber buffers hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(BusState {
                draining: false,
                topics: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Registers a subscriber for one alert key. Refused while draining.
    pub fn subscribe(self: &Arc<Self>, alert_key: &str) -> Result<Subscription> {
        let shared = Arc::new(SubscriberShared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            alert_key: alert_key.to_string(),
            queue: Mutex::new(SubscriberQueue {
                buffer: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        });

        let mut state = self.state.write();
        if state.draining {
            return Err(Error::Unavailable);
        }
        state
            .topics
            .entry(alert_key.to_string())
            .or_default()
            .push(shared.clone());
        debug!(target: "bus", subscriber = shared.id, alert_key, "subscribed");
        Ok(Subscription {
            bus: self.clone(),
            shared,
        })
    }

    /// Delivers `update` to every current subscriber of `alert_key`. Never
    /// blocks and never fails.
    pub fn publish(&self, alert_key: &str, update: AlertUpdate) {
        let state = self.state.read();
        let Some(subscribers) = state.topics.get(alert_key) else {
            return;
        };
        for subscriber in subscribers {
            subscriber.offer(update.clone(), self.capacity);
        }
    }

    /// Number of live subscribers for one alert key.
    pub fn subscriber_count(&self, alert_key: &str) -> usize {
        self.state
            .read()
            .topics
            .get(alert_key)
            .map_or(0, Vec::len)
    }

    /// True once [`UpdateBus::drain`] has begun.
    pub fn is_draining(&self) -> bool {
        self.state.read().draining
    }

    /// Shuts the bus down: refuses new subscriptions, emits `SERVER_STOPPING`
    /// to every subscriber, then closes all buffers after the grace period.
    pub async fn drain(&self, grace: Duration) {
        let subscribers: Vec<Arc<SubscriberShared>> = {
            let mut state = self.state.write();
            state.draining = true;
            state.topics.values().flatten().cloned().collect()
        };
        info!(target: "bus", subscribers = subscribers.len(), "draining update bus");
        for subscriber in &subscribers {
            subscriber.offer(
                AlertUpdate::server_stopping(&subscriber.alert_key),
                self.capacity,
            );
        }

        tokio::time::sleep(grace).await;

        let mut state = self.state.write();
        for subscribers in state.topics.values() {
            for subscriber in subscribers {
                subscriber.close();
            }
        }
        state.topics.clear();
    }

    fn remove(&self, shared: &SubscriberShared) {
        let mut state = self.state.write();
        if let Some(subscribers) = state.topics.get_mut(&shared.alert_key) {
            subscribers.retain(|candidate| candidate.id != shared.id);
            if subscribers.is_empty() {
                state.topics.remove(&shared.alert_key);
            }
        }
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's handle. Dropping it unsubscribes and releases the buffer
/// immediately.
pub struct Subscription {
    bus: Arc<UpdateBus>,
    shared: Arc<SubscriberShared>,
}

impl Subscription {
    /// The subscribed alert key.
    pub fn alert_key(&self) -> &str {
        &self.shared.alert_key
    }

    /// Awaits the next update. Returns `None` once the subscription is
    /// closed and its buffer exhausted.
    pub async fn recv(&self) -> Option<AlertUpdate> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock();
                if let Some(update) = queue.buffer.pop_front() {
                    return Some(update);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant used by tests and by the drain path.
    pub fn try_recv(&self) -> Option<AlertUpdate> {
        self.shared.queue.lock().buffer.pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
        self.bus.remove(&self.shared);
        debug!(
            target: "bus",
            subscriber = self.shared.id,
            alert_key = %self.shared.alert_key,
            "unsubscribed"
        );
    }
}
