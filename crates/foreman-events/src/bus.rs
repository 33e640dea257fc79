// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::warn;

type AnyEvent = Arc<dyn Any + Send + Sync>;
type Handler = Arc<dyn Fn(&AnyEvent) + Send + Sync>;
type Filter = Arc<dyn Fn(&AnyEvent) -> bool + Send + Sync>;

struct Job {
    handler: Handler,
    event: AnyEvent,
}

struct SubEntry {
    id: u64,
    handler: Handler,
    filter: Option<Filter>,
}

struct BusInner {
    subscribers: Mutex<HashMap<TypeId, Vec<SubEntry>>>,
    /// Sender side of the delivery queue.  Taken on close so the worker
    /// pool drains what is left and exits.
    work_tx: Mutex<Option<mpsc::Sender<Job>>>,
    dropped: AtomicU64,
    handler_panics: AtomicU64,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// Process-wide typed event bus.
///
/// `publish` enqueues one delivery job per matching subscriber onto a
/// bounded work queue; a saturated queue (or an event with nobody listening)
/// counts the event as dropped and the publisher never blocks.  Handler
/// panics are caught and counted; they never take a worker down.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// `capacity` bounds the delivery queue; `workers` sizes the pool that
    /// drains it.
    pub fn new(capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let inner = Arc::new(BusInner {
            subscribers: Mutex::new(HashMap::new()),
            work_tx: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let inner_w = Arc::clone(&inner);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let result = catch_unwind(AssertUnwindSafe(|| (job.handler)(&job.event)));
                    if result.is_err() {
                        inner_w.handler_panics.fetch_add(1, Ordering::Relaxed);
                        warn!("event handler panicked; recovered");
                    }
                }
            });
        }

        Self { inner }
    }

    /// Publish an event to every current subscriber of its type.
    ///
    /// Never blocks.  The event is counted as dropped when the bus is
    /// closed, when the delivery queue is full, or when no subscriber of
    /// this type exists.
    pub fn publish<E: Any + Send + Sync>(&self, event: E) {
        if self.inner.closed.load(Ordering::Acquire) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let tx = {
            let guard = self.inner.work_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(tx) = tx else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let event: AnyEvent = Arc::new(event);
        let subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = false;
        if let Some(entries) = subs.get(&TypeId::of::<E>()) {
            for entry in entries {
                if let Some(filter) = &entry.filter {
                    if !filter(&event) {
                        continue;
                    }
                }
                let job = Job { handler: Arc::clone(&entry.handler), event: Arc::clone(&event) };
                match tx.try_send(job) {
                    Ok(()) => delivered = true,
                    Err(_) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        if !delivered && subs.get(&TypeId::of::<E>()).map_or(true, |e| e.is_empty()) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Register a handler for events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> BusSubscription
    where
        E: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_filtered::<E, F, fn(&E) -> bool>(handler, None)
    }

    /// Register a handler with an optional pre-invocation filter.
    pub fn subscribe_filtered<E, F, G>(
        &self,
        handler: F,
        filter: Option<G>,
    ) -> BusSubscription
    where
        E: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
        G: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let wrapped: Handler = Arc::new(move |any: &AnyEvent| {
            if let Some(ev) = any.downcast_ref::<E>() {
                handler(ev);
            }
        });
        let wrapped_filter: Option<Filter> = filter.map(|f| {
            let f: Filter = Arc::new(move |any: &AnyEvent| {
                any.downcast_ref::<E>().map(|ev| f(ev)).unwrap_or(false)
            });
            f
        });

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<E>();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(type_id)
            .or_default()
            .push(SubEntry { id, handler: wrapped, filter: wrapped_filter });

        BusSubscription {
            bus: Arc::downgrade(&self.inner),
            type_id,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Register a channel subscriber for events of type `E`.
    ///
    /// Delivery is `try_send`: when the channel is full the event is dropped
    /// for this subscriber only.  Unsubscribing closes the channel.
    pub fn subscribe_channel<E, G>(
        &self,
        buffer: usize,
        filter: Option<G>,
    ) -> (mpsc::Receiver<E>, BusSubscription)
    where
        E: Any + Send + Sync + Clone,
        G: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel::<E>(buffer.max(1));
        let inner = Arc::downgrade(&self.inner);
        let sub = self.subscribe_filtered::<E, _, G>(
            move |ev: &E| {
                if tx.try_send(ev.clone()).is_err() {
                    if let Some(bus) = inner.upgrade() {
                        bus.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            filter,
        );
        (rx, sub)
    }

    /// Number of live subscribers for an event type.
    pub fn subscriber_count<E: Any>(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Events counted as dropped (saturation, closed bus, or no listeners).
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn handler_panics(&self) -> u64 {
        self.inner.handler_panics.load(Ordering::Relaxed)
    }

    /// Close the bus: subsequent publishes are counted as dropped, the
    /// worker pool drains what is queued and exits, and all subscriber
    /// channels close.  Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.work_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Guard for one bus subscription.  `unsubscribe` is idempotent; dropping
/// the guard unsubscribes too.  Removing a channel subscription drops its
/// sender, which closes the receiver.
pub struct BusSubscription {
    bus: Weak<BusInner>,
    type_id: TypeId,
    id: u64,
    active: AtomicBool,
}

impl BusSubscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let mut subs = bus.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entries) = subs.get_mut(&self.type_id) {
                entries.retain(|e| e.id != self.id);
                if entries.is_empty() {
                    subs.remove(&self.type_id);
                }
            }
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[derive(Debug, Clone)]
    struct Other;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn publish_reaches_typed_subscriber() {
        let bus = EventBus::new(64, 2);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = bus.subscribe::<Ping, _>(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Ping(1));
        bus.publish(Ping(2));
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_types_do_not_cross() {
        let bus = EventBus::new(64, 2);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = bus.subscribe::<Ping, _>(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Other);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filter_is_applied_before_invocation() {
        let bus = EventBus::new(64, 2);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = bus.subscribe_filtered::<Ping, _, _>(
            move |_| {
                seen2.fetch_add(1, Ordering::SeqCst);
            },
            Some(|p: &Ping| p.0 % 2 == 0),
        );
        for i in 0..4 {
            bus.publish(Ping(i));
        }
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publishes_without_subscribers_count_as_dropped() {
        let bus = EventBus::new(2, 1);
        for i in 0..1000 {
            bus.publish(Ping(i));
        }
        assert_eq!(bus.dropped(), 1000);
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
        // Bus remains operable for new subscriptions.
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = bus.subscribe::<Ping, _>(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Ping(0));
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_subscriber_receives_in_publish_order() {
        let bus = EventBus::new(64, 1);
        let (mut rx, _sub) = bus.subscribe_channel(16, None::<fn(&Ping) -> bool>);
        bus.publish(Ping(1));
        bus.publish(Ping(2));
        bus.publish(Ping(3));
        settle().await;
        assert_eq!(rx.recv().await, Some(Ping(1)));
        assert_eq!(rx.recv().await, Some(Ping(2)));
        assert_eq!(rx.recv().await, Some(Ping(3)));
    }

    #[tokio::test]
    async fn full_channel_drops_for_that_subscriber_only() {
        let bus = EventBus::new(1024, 1);
        let (mut slow_rx, _slow) = bus.subscribe_channel(1, None::<fn(&Ping) -> bool>);
        let fast_seen = Arc::new(AtomicUsize::new(0));
        let fs = Arc::clone(&fast_seen);
        let _fast = bus.subscribe::<Ping, _>(move |_| {
            fs.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..50 {
            bus.publish(Ping(i));
            // Give the worker a chance to move each job into the channel so
            // the 1-slot buffer actually overflows.
            tokio::task::yield_now().await;
        }
        settle().await;
        assert_eq!(fast_seen.load(Ordering::SeqCst), 50);
        // The slow subscriber got at most a couple of events.
        let mut got = 0;
        while slow_rx.try_recv().is_ok() {
            got += 1;
        }
        assert!(got < 50, "slow channel should have dropped: got {got}");
        assert!(bus.dropped() > 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_closes_channel() {
        let bus = EventBus::new(64, 1);
        let (mut rx, sub) = bus.subscribe_channel(4, None::<fn(&Ping) -> bool>);
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count::<Ping>(), 0);
        settle().await;
        assert_eq!(rx.recv().await, None, "channel closed after unsubscribe");
    }

    #[tokio::test]
    async fn handler_panic_is_recovered_and_counted() {
        let bus = EventBus::new(64, 1);
        let _bad = bus.subscribe::<Ping, _>(|_| panic!("boom"));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _good = bus.subscribe::<Ping, _>(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Ping(0));
        bus.publish(Ping(1));
        settle().await;
        assert_eq!(bus.handler_panics(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2, "worker survives panics");
    }

    #[tokio::test]
    async fn closed_bus_neither_delivers_nor_panics() {
        let bus = EventBus::new(64, 1);
        let (mut rx, _sub) = bus.subscribe_channel(4, None::<fn(&Ping) -> bool>);
        bus.close();
        bus.publish(Ping(9));
        settle().await;
        assert_eq!(rx.recv().await, None);
        assert!(bus.dropped() >= 1);
        bus.close(); // idempotent
    }
}
