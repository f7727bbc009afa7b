//! Subscriber lifecycle and non-blocking snapshot delivery.
//!
//! The broker owns every subscriber handle; transports reach a subscriber
//! only through the broker interface (register/unregister/offer), so the
//! disconnect path is strictly one-way: broker closes the mailbox, the write
//! pump observes the closed channel and unwinds. Mailbox offers never block
//! and never disconnect a subscriber for backpressure; overflow is counted
//! and the message dropped.

use crate::core::types::MetricKey;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Opaque subscriber identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One connected snapshot consumer: a filter plus a bounded mailbox.
///
/// State machine: `Connected -> Disconnected`, one-shot. After disconnect the
/// mailbox is closed and `offer`/`set_subscription` become no-ops.
pub struct Subscriber {
    id: SubscriberId,
    sender: Mutex<Option<mpsc::Sender<String>>>,
    filter: RwLock<Vec<MetricKey>>,
    disconnected: AtomicBool,
    drops: AtomicU64,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Messages dropped because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Read view of the current filter; empty means "all metrics".
    pub fn filter(&self) -> Vec<MetricKey> {
        self.filter.read().clone()
    }

    /// One-shot transition to Disconnected. Dropping the sender closes the
    /// mailbox, which terminates the write pump.
    fn disconnect(&self) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sender.lock().take();
        true
    }
}

/// Tracks live subscribers and delivers messages with strict non-blocking
/// semantics.
pub struct SubscriptionBroker {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
    total_drops: AtomicU64,
    updates_tx: mpsc::Sender<String>,
    updates_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl SubscriptionBroker {
    /// Create a broker whose subscriber mailboxes hold `mailbox_capacity`
    /// messages and whose ingest hint channel holds `update_capacity`.
    pub fn new(mailbox_capacity: usize, update_capacity: usize) -> Self {
        assert!(mailbox_capacity > 0, "mailbox capacity must be greater than 0");
        let (updates_tx, updates_rx) = mpsc::channel(update_capacity.max(1));
        SubscriptionBroker {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            mailbox_capacity,
            total_drops: AtomicU64::new(0),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    /// Add a subscriber to the live set. Returns the handle and the mailbox
    /// receive side for the transport's write pump.
    pub fn register(&self) -> (Arc<Subscriber>, mpsc::Receiver<String>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let subscriber = Arc::new(Subscriber {
            id,
            sender: Mutex::new(Some(tx)),
            filter: RwLock::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            drops: AtomicU64::new(0),
        });
        self.subscribers
            .write()
            .insert(id, Arc::clone(&subscriber));
        tracing::info!(subscriber = %id, total = self.subscriber_count(), "subscriber connected");
        (subscriber, rx)
    }

    /// Remove and disconnect a subscriber. Idempotent; the mailbox closes
    /// exactly once.
    pub fn unregister(&self, id: SubscriberId) {
        let removed = self.subscribers.write().remove(&id);
        if let Some(subscriber) = removed {
            subscriber.disconnect();
            tracing::info!(subscriber = %id, total = self.subscriber_count(), "subscriber disconnected");
        }
    }

    /// Atomically replace a subscriber's filter. No-op after disconnect.
    pub fn set_subscription(&self, id: SubscriberId, filter: Vec<MetricKey>) {
        let subscriber = self.subscribers.read().get(&id).cloned();
        if let Some(subscriber) = subscriber {
            if subscriber.is_connected() {
                *subscriber.filter.write() = filter;
            }
        }
    }

    /// Best-effort enqueue. Returns whether the message was accepted; a full
    /// mailbox drops the message and bumps the drop counters without
    /// disconnecting the subscriber.
    pub fn offer(&self, subscriber: &Subscriber, message: String) -> bool {
        if !subscriber.is_connected() {
            return false;
        }
        let guard = subscriber.sender.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                subscriber.drops.fetch_add(1, Ordering::Relaxed);
                self.total_drops.fetch_add(1, Ordering::Relaxed);
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Build and offer one message per live subscriber.
    ///
    /// The read lock on the live set is held only for the iteration and every
    /// offer inside it is non-blocking, so the hold time stays bounded by the
    /// builder's own cost.
    pub fn broadcast<F>(&self, mut builder: F)
    where
        F: FnMut(&Subscriber) -> Option<String>,
    {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.values() {
            if let Some(message) = builder(subscriber) {
                self.offer(subscriber, message);
            }
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Messages dropped across all subscribers
    pub fn total_drops(&self) -> u64 {
        self.total_drops.load(Ordering::Relaxed)
    }

    /// Non-blocking data hint from the ingest side, keyed by service.
    pub fn notify_update(&self, service: &str) {
        // Dropped when full; the fixed-rate tick covers the data anyway.
        let _ = self.updates_tx.try_send(service.to_string());
    }

    /// Hand the hint channel's receive side to the scheduler. Yields `Some`
    /// exactly once.
    pub fn take_update_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.updates_rx.lock().take()
    }

    /// Disconnect everyone; used on shutdown after the scheduler has stopped.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Subscriber>> =
            self.subscribers.write().drain().map(|(_, s)| s).collect();
        for subscriber in &drained {
            subscriber.disconnect();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all subscriber mailboxes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str, name: &str) -> MetricKey {
        MetricKey::new(service, name).unwrap()
    }

    #[test]
    fn test_register_and_unregister() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub, _rx) = broker.register();
        assert_eq!(broker.subscriber_count(), 1);
        assert!(sub.is_connected());

        broker.unregister(sub.id());
        assert_eq!(broker.subscriber_count(), 0);
        assert!(!sub.is_connected());

        // Idempotent.
        broker.unregister(sub.id());
        assert!(!sub.is_connected());
    }

    #[test]
    fn test_offer_delivers() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub, mut rx) = broker.register();

        assert!(broker.offer(&sub, "hello".to_string()));
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_mailbox_overflow_drops_without_disconnect() {
        let broker = SubscriptionBroker::new(2, 4);
        let (sub, mut rx) = broker.register();

        let mut accepted = 0;
        for i in 0..5 {
            if broker.offer(&sub, format!("tick-{i}")) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 2);
        assert_eq!(sub.dropped(), 3);
        assert_eq!(broker.total_drops(), 3);
        assert!(sub.is_connected());

        // The queued messages are the two oldest offers.
        assert_eq!(rx.try_recv().unwrap(), "tick-0");
        assert_eq!(rx.try_recv().unwrap(), "tick-1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_offer_after_disconnect_is_noop() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub, _rx) = broker.register();
        broker.unregister(sub.id());

        assert!(!broker.offer(&sub, "late".to_string()));
        assert_eq!(sub.dropped(), 0);
    }

    #[test]
    fn test_set_subscription_replaces_filter() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub, _rx) = broker.register();
        assert!(sub.filter().is_empty());

        let filter = vec![key("s1", "a"), key("s1", "b")];
        broker.set_subscription(sub.id(), filter.clone());
        assert_eq!(sub.filter(), filter);

        // Replacing with the same filter is observationally identical.
        broker.set_subscription(sub.id(), filter.clone());
        assert_eq!(sub.filter(), filter);

        broker.set_subscription(sub.id(), vec![key("s2", "c")]);
        assert_eq!(sub.filter(), vec![key("s2", "c")]);
    }

    #[test]
    fn test_set_subscription_after_disconnect_is_noop() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub, _rx) = broker.register();
        broker.unregister(sub.id());

        broker.set_subscription(sub.id(), vec![key("s1", "a")]);
        assert!(sub.filter().is_empty());
    }

    #[test]
    fn test_broadcast_builds_per_subscriber() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub_a, mut rx_a) = broker.register();
        let (sub_b, mut rx_b) = broker.register();
        broker.set_subscription(sub_b.id(), vec![key("s1", "b")]);

        broker.broadcast(|sub| {
            if sub.filter().is_empty() {
                Some("full".to_string())
            } else {
                Some("filtered".to_string())
            }
        });

        assert_eq!(rx_a.try_recv().unwrap(), "full");
        assert_eq!(rx_b.try_recv().unwrap(), "filtered");
        let _ = sub_a;
    }

    #[test]
    fn test_update_hints() {
        let broker = SubscriptionBroker::new(4, 2);
        let mut updates = broker.take_update_receiver().unwrap();
        assert!(broker.take_update_receiver().is_none());

        broker.notify_update("a");
        broker.notify_update("b");
        // Channel full: dropped silently.
        broker.notify_update("c");

        assert_eq!(updates.try_recv().unwrap(), "a");
        assert_eq!(updates.try_recv().unwrap(), "b");
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_closes_all_mailboxes() {
        let broker = SubscriptionBroker::new(4, 4);
        let (sub_a, mut rx_a) = broker.register();
        let (sub_b, mut rx_b) = broker.register();

        broker.shutdown();
        assert_eq!(broker.subscriber_count(), 0);
        assert!(!sub_a.is_connected());
        assert!(!sub_b.is_connected());
        // Closed mailboxes report disconnection to their pumps.
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(matches!(
            rx_b.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
