//! # Event Bus
//!
//! Bounded queue between the ingestion context (the radio's scan callback) and
//! application consumers. The producer pushes from whatever thread the
//! transport calls back on; the consumer calls [`EventBus::drain`] from its own
//! loop, which pops up to a per-call budget and hands every event to each
//! registered subscriber in registration order.
//!
//! When the queue is full the oldest unread event is evicted and the drop
//! counter increments, so consumers see bounded staleness rather than stalls.

use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::logutil::truncate_utf8;
use crate::metrics;
use crate::parcel::{Checksum, MessageId};
use crate::radio::Address;

/// Observation produced by the ingestion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A validated single-line text advertisement.
    SingleText {
        text: String,
        rssi: i8,
        origin: Address,
    },
    /// A fully reassembled and checksum-verified message.
    MessageDone {
        id: MessageId,
        sender: String,
        destination: String,
        checksum: Checksum,
        /// Full message length in bytes.
        length: usize,
        /// Leading bytes of the message, cut on a character boundary.
        preview: String,
    },
}

impl Event {
    pub fn single_text(text: &str, rssi: i8, origin: Address, max_text: usize) -> Self {
        Event::SingleText {
            text: truncate_utf8(text, max_text).to_string(),
            rssi,
            origin,
        }
    }

    pub fn message_done(
        id: MessageId,
        sender: &str,
        destination: &str,
        checksum: Checksum,
        message: &str,
        max_text: usize,
    ) -> Self {
        Event::MessageDone {
            id,
            sender: truncate_utf8(sender, max_text).to_string(),
            destination: truncate_utf8(destination, max_text).to_string(),
            checksum,
            length: message.len(),
            preview: truncate_utf8(message, max_text).to_string(),
        }
    }
}

/// Opaque handle returned by [`EventBus::subscribe`].
///
/// Carries the slot and the registration id, so a token outliving its
/// subscription never matches whoever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    slot: usize,
    id: NonZeroU64,
}

type Callback = Box<dyn FnMut(&Event) + Send>;

struct Subscriber {
    id: NonZeroU64,
    callback: Callback,
}

#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub queue_depth: usize,
    pub deliver_budget: usize,
    pub max_subscribers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            deliver_budget: 12,
            max_subscribers: 4,
        }
    }
}

pub struct EventBus {
    queue: Mutex<VecDeque<Event>>,
    subscribers: Mutex<Vec<Option<Subscriber>>>,
    next_id: AtomicU64,
    depth: usize,
    budget: usize,
    dropped: AtomicU64,
}

// A panicking subscriber must not wedge the producer side.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let depth = config.queue_depth.max(1);
        let mut subscribers = Vec::with_capacity(config.max_subscribers);
        subscribers.resize_with(config.max_subscribers.max(1), || None);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(depth)),
            subscribers: Mutex::new(subscribers),
            depth,
            budget: config.deliver_budget.max(1),
            dropped: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue `event`, evicting the oldest unread one when full.
    pub fn push(&self, event: Event) {
        let mut queue = relock(&self.queue);
        if queue.len() >= self.depth {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::inc_events_dropped();
        }
        queue.push_back(event);
    }

    fn pop(&self) -> Option<Event> {
        relock(&self.queue).pop_front()
    }

    /// Register `callback`. Returns `None` when the subscriber table is full.
    pub fn subscribe<F>(&self, callback: F) -> Option<SubscriptionToken>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut subs = relock(&self.subscribers);
        let slot = subs.iter().position(Option::is_none)?;
        let id = NonZeroU64::new(self.next_id.fetch_add(1, Ordering::Relaxed))?;
        subs[slot] = Some(Subscriber {
            id,
            callback: Box::new(callback),
        });
        Some(SubscriptionToken { slot, id })
    }

    /// Remove a subscriber. Unknown or stale tokens are ignored.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut subs = relock(&self.subscribers);
        if let Some(slot) = subs.get_mut(token.slot) {
            if slot.as_ref().is_some_and(|s| s.id == token.id) {
                *slot = None;
            }
        }
    }

    /// Deliver up to the configured budget of queued events. Returns how many
    /// events were popped.
    ///
    /// Callbacks run with the subscriber table locked; they must not call
    /// `subscribe`/`unsubscribe` on the same bus.
    pub fn drain(&self) -> usize {
        let mut delivered = 0;
        while delivered < self.budget {
            let Some(event) = self.pop() else { break };
            let mut subs = relock(&self.subscribers);
            for sub in subs.iter_mut().flatten() {
                (sub.callback)(&event);
            }
            delivered += 1;
        }
        delivered
    }

    /// Events evicted by overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        relock(&self.queue).len()
    }

    pub fn subscriber_count(&self) -> usize {
        relock(&self.subscribers).iter().filter(|s| s.is_some()).count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("depth", &self.depth)
            .field("budget", &self.budget)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn text(n: usize) -> Event {
        Event::single_text(&format!("msg{n}"), -40, Address::default(), 64)
    }

    #[test]
    fn overflow_evicts_oldest_and_counts() {
        let bus = EventBus::new(BusConfig {
            queue_depth: 3,
            deliver_budget: 10,
            max_subscribers: 1,
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e| {
            if let Event::SingleText { text, .. } = e {
                sink.lock().unwrap().push(text.clone());
            }
        })
        .unwrap();
        for n in 0..5 {
            bus.push(text(n));
        }
        assert_eq!(bus.dropped(), 2);
        assert_eq!(bus.drain(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["msg2", "msg3", "msg4"]);
    }

    #[test]
    fn drain_respects_budget() {
        let bus = EventBus::new(BusConfig {
            queue_depth: 32,
            deliver_budget: 2,
            max_subscribers: 1,
        });
        for n in 0..5 {
            bus.push(text(n));
        }
        assert_eq!(bus.drain(), 2);
        assert_eq!(bus.pending(), 3);
        assert_eq!(bus.drain(), 2);
        assert_eq!(bus.drain(), 1);
        assert_eq!(bus.drain(), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order_and_can_leave() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = order.clone();
        let b = order.clone();
        let first = bus.subscribe(move |_| a.lock().unwrap().push("first")).unwrap();
        bus.subscribe(move |_| b.lock().unwrap().push("second")).unwrap();
        bus.push(text(0));
        bus.drain();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        bus.unsubscribe(first);
        bus.push(text(1));
        bus.drain();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "second"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn stale_token_leaves_slot_reuser_alone() {
        let bus = EventBus::default();
        let old = bus.subscribe(|_| {}).unwrap();
        bus.unsubscribe(old);

        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let fresh = bus.subscribe(move |_| *h.lock().unwrap() += 1).unwrap();
        assert_ne!(old, fresh);

        bus.unsubscribe(old);
        assert_eq!(bus.subscriber_count(), 1);
        bus.push(text(0));
        bus.drain();
        assert_eq!(*hits.lock().unwrap(), 1);

        bus.unsubscribe(fresh);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_table_is_bounded() {
        let bus = EventBus::new(BusConfig {
            max_subscribers: 2,
            ..BusConfig::default()
        });
        assert!(bus.subscribe(|_| {}).is_some());
        let second = bus.subscribe(|_| {}).unwrap();
        assert!(bus.subscribe(|_| {}).is_none());
        bus.unsubscribe(second);
        assert!(bus.subscribe(|_| {}).is_some());
    }

    #[test]
    fn previews_are_bounded() {
        let id: MessageId = "QK".parse().unwrap();
        let long = "x".repeat(200);
        match Event::message_done(id, "A", "B", Checksum::EMPTY, &long, 64) {
            Event::MessageDone { length, preview, .. } => {
                assert_eq!(length, 200);
                assert_eq!(preview.len(), 64);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let bus = Arc::new(EventBus::new(BusConfig {
            queue_depth: 1024,
            deliver_budget: 64,
            max_subscribers: 1,
        }));
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        let producer = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for n in 0..500 {
                    bus.push(text(n));
                }
            })
        };
        producer.join().unwrap();
        while bus.drain() > 0 {}
        assert_eq!(count.load(Ordering::Relaxed), 500);
    }
}
