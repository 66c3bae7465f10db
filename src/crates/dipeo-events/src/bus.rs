//! In-memory event bus.
//!
//! Publish/subscribe over [`ExecutionEvent`]s with bounded per-subscriber
//! queues. Publishing is synchronous and never blocks: a full queue drops
//! its oldest entry and bumps the subscriber's `dropped` counter. Events
//! for one execution get strictly monotonic sequences and reach each
//! subscriber in order; there is no ordering guarantee across executions.
//!
//! A bounded replay ring keeps the last N events per execution so late
//! subscribers can cold-start from `sequence + 1`.

use crate::error::Result;
use dipeo_domain::{EventType, ExecutionEvent, ExecutionId};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_REPLAY_CAPACITY: usize = 1000;

/// What a subscriber wants to see.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// `None` means every event type.
    pub event_types: Option<BTreeSet<EventType>>,
    /// `None` means every execution.
    pub execution_id: Option<ExecutionId>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    pub fn of_types(event_types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: Some(event_types.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &ExecutionEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(id) = &self.execution_id {
            if &event.execution_id != id {
                return false;
            }
        }
        true
    }
}

struct SubscriberQueue {
    filter: EventFilter,
    queue: Mutex<VecDeque<ExecutionEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    /// Drop-oldest enqueue; the publisher never waits on a slow consumer.
    fn push(&self, event: ExecutionEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// A subscriber handle. Dropping it unsubscribes.
pub struct Subscription {
    inner: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Wait for the next event; `None` once the subscription is closed and
    /// drained.
    pub async fn recv(&self) -> Option<ExecutionEvent> {
        loop {
            if let Some(event) = self.inner.queue.lock().pop_front() {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<ExecutionEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// How many events were dropped because this subscriber lagged.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

struct BusInner {
    subscribers: Vec<Arc<SubscriberQueue>>,
    sequences: BTreeMap<ExecutionId, u64>,
    replay: BTreeMap<ExecutionId, VecDeque<ExecutionEvent>>,
}

/// The bus. Cheap to clone via `Arc`; one instance per runtime.
pub struct EventBus {
    inner: Mutex<BusInner>,
    queue_capacity: usize,
    replay_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLAY_CAPACITY)
    }

    pub fn with_capacities(queue_capacity: usize, replay_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: Vec::new(),
                sequences: BTreeMap::new(),
                replay: BTreeMap::new(),
            }),
            queue_capacity: queue_capacity.max(1),
            replay_capacity: replay_capacity.max(1),
        }
    }

    /// Publish an event. Assigns the next sequence for its execution,
    /// records it in the replay ring, and fans it out. Returns the
    /// assigned sequence. Never blocks.
    pub fn publish(&self, mut event: ExecutionEvent) -> u64 {
        let mut inner = self.inner.lock();

        let seq = inner
            .sequences
            .entry(event.execution_id.clone())
            .and_modify(|s| *s += 1)
            .or_insert(1);
        event.sequence = *seq;
        let sequence = event.sequence;

        let ring = inner
            .replay
            .entry(event.execution_id.clone())
            .or_insert_with(VecDeque::new);
        if ring.len() >= self.replay_capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());

        inner
            .subscribers
            .retain(|s| !s.closed.load(Ordering::Acquire));
        for subscriber in &inner.subscribers {
            if subscriber.filter.matches(&event) {
                subscriber.push(event.clone());
            }
        }

        sequence
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            filter,
            queue: Mutex::new(VecDeque::new()),
            capacity: self.queue_capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.inner.lock().subscribers.push(queue.clone());
        Subscription { inner: queue }
    }

    /// Subscribe to one execution, replaying the retained tail after
    /// `after_sequence` before going live. Replay and registration happen
    /// under one lock, so no event is missed or duplicated in between.
    pub fn subscribe_from(
        &self,
        execution_id: &ExecutionId,
        after_sequence: u64,
    ) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            filter: EventFilter::for_execution(execution_id.clone()),
            queue: Mutex::new(VecDeque::new()),
            capacity: self.queue_capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let mut inner = self.inner.lock();
        if let Some(ring) = inner.replay.get(execution_id) {
            for event in ring.iter().filter(|e| e.sequence > after_sequence) {
                queue.push(event.clone());
            }
        }
        inner.subscribers.push(queue.clone());
        Subscription { inner: queue }
    }

    /// Spawn a bus-owned worker that drains a subscription into a handler.
    /// Handler failures are logged and swallowed; a dying handler must not
    /// take executions down with it.
    pub fn subscribe_handler<F>(&self, filter: EventFilter, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(ExecutionEvent) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let subscription = self.subscribe(filter);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Err(e) = handler(event).await {
                    tracing::error!(error = %e, "event handler failed");
                }
            }
        })
    }

    /// Latest assigned sequence for an execution (0 when none yet).
    pub fn current_sequence(&self, execution_id: &ExecutionId) -> u64 {
        self.inner
            .lock()
            .sequences
            .get(execution_id)
            .copied()
            .unwrap_or(0)
    }

    /// Drop the replay ring and sequence counter of a finished execution.
    pub fn forget_execution(&self, execution_id: &ExecutionId) {
        let mut inner = self.inner.lock();
        inner.replay.remove(execution_id);
        inner.sequences.remove(execution_id);
    }
}
