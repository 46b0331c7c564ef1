//! Ring-buffered fan-out with drop-oldest subscriber queues.
//!
//! [`BroadcastHub`] keeps the last `capacity` published entries in a fixed
//! arena and pushes every new entry to each registered [`Subscription`].
//!
//! - `publish` never blocks and never waits on a consumer. The ring write
//!   holds one short lock covering `head` and `count` together; fan-out
//!   happens after it is released.
//! - Each subscriber queue is bounded. When full, the oldest unread entry is
//!   discarded to admit the new one.
//! - History reads ([`BroadcastHub::entries`]) capture their bounds under the
//!   ring lock but read slots one at a time afterwards. A publish racing with
//!   a read may be observed partially: history is eventually consistent, not
//!   a snapshot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

struct Ring<T> {
    slots: Vec<Option<T>>,
    /// Next slot to write.
    head: usize,
    count: usize,
}

impl<T> Ring<T> {
    fn start(&self) -> usize {
        if self.count < self.slots.len() { 0 } else { self.head }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct SubscriberQueue<T> {
    id: u64,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> SubscriberQueue<T> {
    fn push(&self, item: T) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.items.len() >= self.capacity {
                let _ = state.items.pop_front();
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }
}

type SubscriberSet<T> = Mutex<Vec<Arc<SubscriberQueue<T>>>>;

/// Fixed-capacity history plus fan-out to bounded subscriber queues.
pub struct BroadcastHub<T> {
    ring: Mutex<Ring<T>>,
    subscribers: Arc<SubscriberSet<T>>,
    next_subscriber: AtomicU64,
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// Create a hub keeping the last `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                count: 0,
            }),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Append `entry` to the history and push it to every subscriber queue.
    pub fn publish(&self, entry: T) {
        {
            let mut ring = self.ring.lock();
            let head = ring.head;
            let capacity = ring.slots.len();
            ring.slots[head] = Some(entry.clone());
            ring.head = (head + 1) % capacity;
            ring.count = (ring.count + 1).min(capacity);
        }

        let targets: Vec<Arc<SubscriberQueue<T>>> = self.subscribers.lock().clone();
        for queue in targets {
            queue.push(entry.clone());
        }
    }

    /// Register a new subscriber whose queue holds at most `queue_capacity`
    /// unread entries (at least one).
    pub fn subscribe(&self, queue_capacity: usize) -> Subscription<T> {
        let queue = Arc::new(SubscriberQueue {
            id: self.next_subscriber.fetch_add(1, Ordering::Relaxed),
            capacity: queue_capacity.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.subscribers.lock().push(queue.clone());
        Subscription {
            handle: Unsubscriber {
                queue,
                set: Arc::downgrade(&self.subscribers),
            },
        }
    }

    /// Iterate the retained history, oldest first.
    ///
    /// Bounds are captured once; each slot is then read under its own short
    /// lock, so a concurrent publish may be reflected partially.
    pub fn entries(&self) -> impl Iterator<Item = T> + '_ {
        let (start, count, capacity) = {
            let ring = self.ring.lock();
            (ring.start(), ring.count, ring.slots.len())
        };
        (0..count).filter_map(move |offset| {
            let ring = self.ring.lock();
            ring.slots[(start + offset) % capacity].clone()
        })
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// Whether nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Removes one subscription from its hub. Cloneable so that a task other
/// than the consumer can end the subscription.
pub struct Unsubscriber<T> {
    queue: Arc<SubscriberQueue<T>>,
    set: Weak<SubscriberSet<T>>,
}

impl<T> Clone for Unsubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            set: self.set.clone(),
        }
    }
}

impl<T> Unsubscriber<T> {
    /// Remove the queue from the fan-out set and close it. Entries already
    /// queued can still be drained; after that `recv` returns `None`.
    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            let id = self.queue.id;
            set.lock().retain(|queue| queue.id != id);
        }
        self.queue.close();
    }

    /// Whether the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue.state.lock().closed
    }
}

/// Consumer side of one hub subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    handle: Unsubscriber<T>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wait for the next entry. Returns `None` once unsubscribed and drained.
    pub async fn recv(&self) -> Option<T> {
        let queue = &self.handle.queue;
        loop {
            let notified = queue.notify.notified();
            {
                let mut state = queue.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next entry if one is queued.
    pub fn try_recv(&self) -> Option<T> {
        self.handle.queue.state.lock().items.pop_front()
    }

    /// Take every queued entry.
    pub fn drain(&self) -> Vec<T> {
        self.handle.queue.state.lock().items.drain(..).collect()
    }

    /// Entries discarded because this queue was full.
    pub fn dropped(&self) -> u64 {
        self.handle.queue.dropped.load(Ordering::Relaxed)
    }

    /// A handle that can end this subscription from elsewhere.
    pub fn unsubscriber(&self) -> Unsubscriber<T> {
        self.handle.clone()
    }

    /// End the subscription.
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    /// Consume entries as a stream that ends when the subscription closes.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures::stream::unfold(self, |subscription| async move {
            let item = subscription.recv().await?;
            Some((item, subscription))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
