//! Typed publish/subscribe bus for push notifications.
//!
//! Producers publish [`Notification`]s addressed either to a group (per-job
//! or per-batch) or as a global broadcast; subscribers receive an ordered
//! stream of stamped envelopes. Delivery is best-effort: each subscriber has
//! its own bounded queue, a slow subscriber loses its oldest undelivered
//! envelope rather than blocking publication, and a dropped subscription is
//! pruned on the next publish.
//!
//! # Ordering
//!
//! Envelopes are observed in publication order per subscriber (a single FIFO
//! per subscriber); no order is promised across subscribers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::events::{Envelope, Notification};

/// Default per-subscriber queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Addressing key for a publication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// Subscribers watching one job.
    Job(String),
    /// Subscribers watching one batch.
    Batch(String),
    /// Every connected subscriber.
    All,
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(id) => write!(f, "job:{id}"),
            Self::Batch(id) => write!(f, "batch:{id}"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Bounded FIFO shared between the bus and one subscription.
struct SubscriberQueue {
    deque: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue, evicting the oldest envelope when the queue is full.
    fn push(&self, envelope: Envelope) {
        {
            let mut deque = self.deque.lock().expect("subscriber queue poisoned");
            if deque.len() >= self.capacity {
                deque.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            deque.push_back(envelope);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Envelope> {
        self.deque
            .lock()
            .expect("subscriber queue poisoned")
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A subscriber's receiving end.
///
/// Dropping the subscription disconnects the subscriber; the bus prunes the
/// entry on its next publish.
pub struct Subscription {
    id: String,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// The subscriber id this subscription was registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next envelope, waiting until one is published.
    ///
    /// Returns `None` once the bus has unsubscribed this id and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.queue.pop() {
                return Some(envelope);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.queue.pop()
    }

    /// Number of envelopes evicted because this subscriber was slow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
    }
}

struct SubscriberEntry {
    queue: Arc<SubscriberQueue>,
    groups: HashSet<Group>,
}

/// The process-wide notification bus.
///
/// Cheap to clone via `Arc`; every producer takes an `Arc<NotificationBus>`
/// as an explicit dependency.
pub struct NotificationBus {
    subscribers: Mutex<HashMap<String, SubscriberEntry>>,
    queue_capacity: usize,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl NotificationBus {
    /// Create a bus with the given per-subscriber queue bound.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a subscriber and return its receiving end.
    ///
    /// Re-subscribing under an existing id disconnects the previous
    /// subscription.
    pub fn subscribe(&self, id: impl Into<String>) -> Subscription {
        let id = id.into();
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        let entry = SubscriberEntry {
            queue: Arc::clone(&queue),
            groups: HashSet::new(),
        };
        let previous = self
            .subscribers
            .lock()
            .expect("bus registry poisoned")
            .insert(id.clone(), entry);
        if let Some(previous) = previous {
            previous.queue.close();
        }
        Subscription { id, queue }
    }

    /// Disconnect a subscriber entirely.
    pub fn unsubscribe(&self, id: &str) {
        let removed = self
            .subscribers
            .lock()
            .expect("bus registry poisoned")
            .remove(id);
        if let Some(entry) = removed {
            entry.queue.close();
        }
    }

    /// Add a `(subscriber, group)` membership.
    ///
    /// Returns false when the subscriber is unknown.
    pub fn join(&self, id: &str, group: Group) -> bool {
        let mut subscribers = self.subscribers.lock().expect("bus registry poisoned");
        match subscribers.get_mut(id) {
            Some(entry) => {
                entry.groups.insert(group);
                true
            }
            None => false,
        }
    }

    /// Remove exactly one `(subscriber, group)` membership.
    pub fn leave(&self, id: &str, group: &Group) -> bool {
        let mut subscribers = self.subscribers.lock().expect("bus registry poisoned");
        subscribers
            .get_mut(id)
            .is_some_and(|entry| entry.groups.remove(group))
    }

    /// Publish an event to a group (or to everyone with [`Group::All`]).
    ///
    /// Returns the number of subscribers the envelope was queued for.
    pub fn publish(&self, group: &Group, event: Notification) -> usize {
        let envelope = Envelope::now(event);
        let mut delivered = 0usize;
        let mut subscribers = self.subscribers.lock().expect("bus registry poisoned");
        subscribers.retain(|id, entry| {
            if entry.queue.is_closed() {
                tracing::debug!(subscriber = %id, "pruning disconnected subscriber");
                return false;
            }
            let addressed = matches!(group, Group::All) || entry.groups.contains(group);
            if addressed {
                entry.queue.push(envelope.clone());
                delivered += 1;
            }
            true
        });
        delivered
    }

    /// Convenience: publish to a job's group.
    pub fn publish_job(&self, job_id: &str, event: Notification) -> usize {
        self.publish(&Group::Job(job_id.to_string()), event)
    }

    /// Convenience: publish a global broadcast.
    pub fn broadcast(&self, event: Notification) -> usize {
        self.publish(&Group::All, event)
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus registry poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(task_id: &str, progress: u8) -> Notification {
        Notification::ProgressUpdate {
            task_id: task_id.into(),
            progress,
            message: String::new(),
            speed: None,
            remaining_seconds: None,
        }
    }

    #[tokio::test]
    async fn job_group_delivers_only_to_members() {
        let bus = NotificationBus::default();
        let mut member = bus.subscribe("member");
        let mut outsider = bus.subscribe("outsider");
        bus.join("member", Group::Job("j1".into()));

        let delivered = bus.publish_job("j1", progress("j1", 10));
        assert_eq!(delivered, 1);
        assert!(member.recv().await.is_some());
        assert!(outsider.try_recv().is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let bus = NotificationBus::default();
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");

        let delivered = bus.broadcast(Notification::SystemNotification {
            message: "maintenance".into(),
            level: "info".into(),
        });
        assert_eq!(delivered, 2);
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }

    #[tokio::test]
    async fn leave_removes_exactly_that_membership() {
        let bus = NotificationBus::default();
        let mut sub = bus.subscribe("s");
        bus.join("s", Group::Job("j1".into()));
        bus.join("s", Group::Job("j2".into()));
        assert!(bus.leave("s", &Group::Job("j1".into())));

        bus.publish_job("j1", progress("j1", 1));
        bus.publish_job("j2", progress("j2", 2));

        let envelope = sub.recv().await.unwrap();
        match envelope.event {
            Notification::ProgressUpdate { task_id, .. } => assert_eq!(task_id, "j2"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_first() {
        let bus = NotificationBus::new(4);
        let mut sub = bus.subscribe("slow");
        bus.join("slow", Group::Job("j".into()));

        for i in 0..6u8 {
            bus.publish_job("j", progress("j", i));
        }

        // Capacity 4: envelopes 0 and 1 were evicted.
        let first = sub.recv().await.unwrap();
        match first.event {
            Notification::ProgressUpdate { progress, .. } => assert_eq!(progress, 2),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(sub.dropped(), 2);
    }

    #[tokio::test]
    async fn per_subscriber_order_is_preserved() {
        let bus = NotificationBus::default();
        let mut sub = bus.subscribe("s");
        bus.join("s", Group::Job("j".into()));

        for i in 0..10u8 {
            bus.publish_job("j", progress("j", i));
        }
        let mut last = 0;
        for _ in 0..10 {
            match sub.recv().await.unwrap().event {
                Notification::ProgressUpdate { progress, .. } => {
                    assert!(progress >= last);
                    last = progress;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_on_publish() {
        let bus = NotificationBus::default();
        let sub = bus.subscribe("gone");
        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        bus.broadcast(Notification::SystemNotification {
            message: "tick".into(),
            level: "info".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
