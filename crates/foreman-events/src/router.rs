// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reserved prefix: events whose entity starts with this never reach
/// subscribers that did not opt in.
const INTERNAL_PREFIX: &str = "internal";

/// A domain event streamed to external subscribers.
///
/// `entity` + `action` compose the matchable name (`"task.created"`,
/// `"message.chunk"`, `"tool.result"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub entity: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl StreamEvent {
    pub fn new(
        entity: impl Into<String>,
        action: impl Into<String>,
        task_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity: entity.into(),
            action: action.into(),
            timestamp: Utc::now(),
            task_id,
            payload,
        }
    }

    /// Full dotted name, the string patterns are matched against.
    pub fn name(&self) -> String {
        format!("{}.{}", self.entity, self.action)
    }

    fn is_internal(&self) -> bool {
        self.entity == INTERNAL_PREFIX
            || self.entity.starts_with(&format!("{INTERNAL_PREFIX}."))
    }
}

/// Subscriber parameters.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Patterns: `*`, `entity.*`, `*.action`, or exact `entity.action`.
    pub event_types: Vec<String>,
    /// When set, only events carrying this exact task id are delivered;
    /// events without a task id never match.
    pub task_id: Option<Uuid>,
    /// Opt in to `internal.`-prefixed events.
    pub internal: bool,
    /// Channel capacity; overflow drops events for this subscriber.
    pub buffer: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { event_types: vec!["*".into()], task_id: None, internal: false, buffer: 256 }
    }
}

struct RouterSub {
    patterns: Vec<String>,
    task_id: Option<Uuid>,
    internal: bool,
    tx: mpsc::Sender<StreamEvent>,
}

struct RouterInner {
    subs: Mutex<HashMap<u64, RouterSub>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Pattern-matched fan-out of [`StreamEvent`]s.
///
/// Each subscriber gets a bounded channel; delivery is `try_send` and a full
/// channel drops the event for that subscriber only.  Closing the router
/// removes all subscriptions and makes further publishes no-ops.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(
        &self,
        opts: SubscribeOptions,
    ) -> (mpsc::Receiver<StreamEvent>, RouterSubscription) {
        let (tx, rx) = mpsc::channel(opts.buffer.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            RouterSub {
                patterns: opts.event_types,
                task_id: opts.task_id,
                internal: opts.internal,
                tx,
            },
        );
        let sub = RouterSubscription {
            router: Arc::downgrade(&self.inner),
            id,
            active: AtomicBool::new(true),
        };
        (rx, sub)
    }

    /// Subscribe with a lifetime bounded by `token`: cancellation removes
    /// the subscription and closes the channel.
    pub fn subscribe_with_cancel(
        &self,
        opts: SubscribeOptions,
        token: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (rx, sub) = self.subscribe(opts);
        tokio::spawn(async move {
            token.cancelled().await;
            sub.unsubscribe();
        });
        rx
    }

    pub fn publish(&self, event: StreamEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let subs = self.inner.subs.lock().unwrap_or_else(|e| e.into_inner());
        for sub in subs.values() {
            if !sub_matches(sub, &event) {
                continue;
            }
            if sub.tx.try_send(event.clone()).is_err() {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop every subscription and reject subsequent publishes.  Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subs.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn sub_matches(sub: &RouterSub, event: &StreamEvent) -> bool {
    // Task scoping: a scoped subscription requires an exact id match, and
    // events without a task id never match a scoped subscription.
    if let Some(want) = sub.task_id {
        match event.task_id {
            Some(have) if have == want => {}
            _ => return false,
        }
    }

    let internal_event = event.is_internal();
    sub.patterns.iter().any(|p| {
        if internal_event && !sub.internal && !p.starts_with(&format!("{INTERNAL_PREFIX}.")) {
            // Wildcards never leak internal events to unflagged subscribers.
            return false;
        }
        pattern_matches(p, event)
    })
}

/// Pattern semantics: `*` (all), `entity.*`, `*.action`, exact
/// `entity.action`.  The entity may itself contain dots (`internal.queue`),
/// so wildcard forms split at the last separator.
fn pattern_matches(pattern: &str, event: &StreamEvent) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event.entity == prefix;
    }
    if let Some(action) = pattern.strip_prefix("*.") {
        return event.action == action;
    }
    pattern == event.name()
}

/// Guard for one router subscription; dropping it unsubscribes.
pub struct RouterSubscription {
    router: Weak<RouterInner>,
    id: u64,
    active: AtomicBool,
}

impl RouterSubscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.subs.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
        }
    }
}

impl Drop for RouterSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(entity: &str, action: &str, task: Option<Uuid>) -> StreamEvent {
        StreamEvent::new(entity, action, task, serde_json::json!({}))
    }

    fn opts(patterns: &[&str]) -> SubscribeOptions {
        SubscribeOptions {
            event_types: patterns.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exact_pattern_matches_only_that_name() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["task.created"]));
        router.publish(ev("task", "created", None));
        router.publish(ev("task", "deleted", None));
        assert_eq!(rx.recv().await.unwrap().action, "created");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn entity_wildcard_matches_all_actions() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["message.*"]));
        router.publish(ev("message", "created", None));
        router.publish(ev("message", "chunk", None));
        router.publish(ev("task", "created", None));
        assert_eq!(rx.recv().await.unwrap().action, "created");
        assert_eq!(rx.recv().await.unwrap().action, "chunk");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn action_wildcard_matches_across_entities() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["*.deleted"]));
        router.publish(ev("task", "deleted", None));
        router.publish(ev("message", "deleted", None));
        router.publish(ev("task", "created", None));
        assert_eq!(rx.recv().await.unwrap().entity, "task");
        assert_eq!(rx.recv().await.unwrap().entity, "message");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn star_never_matches_internal_events() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["*"]));
        router.publish(ev("internal.queue", "updated", None));
        router.publish(ev("task", "created", None));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.entity, "task");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn internal_flag_lets_wildcards_see_internal_events() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(SubscribeOptions {
            event_types: vec!["*".into()],
            internal: true,
            ..Default::default()
        });
        router.publish(ev("internal.queue", "updated", None));
        assert_eq!(rx.recv().await.unwrap().entity, "internal.queue");
    }

    #[tokio::test]
    async fn internal_prefixed_pattern_matches_without_flag() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["internal.queue.*"]));
        router.publish(ev("internal.queue", "updated", None));
        assert_eq!(rx.recv().await.unwrap().action, "updated");
    }

    #[tokio::test]
    async fn task_scoped_subscription_requires_exact_match() {
        let router = EventRouter::new();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (mut rx, _sub) = router.subscribe(SubscribeOptions {
            event_types: vec!["*".into()],
            task_id: Some(mine),
            ..Default::default()
        });
        router.publish(ev("task", "updated", Some(other)));
        router.publish(ev("task", "updated", None)); // no task id: never matches
        router.publish(ev("task", "updated", Some(mine)));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.task_id, Some(mine));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(SubscribeOptions {
            event_types: vec!["*".into()],
            buffer: 2,
            ..Default::default()
        });
        for _ in 0..10 {
            router.publish(ev("task", "updated", None));
        }
        assert_eq!(router.dropped(), 8);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_on_guard_drop() {
        let router = EventRouter::new();
        {
            let (_rx, _sub) = router.subscribe(opts(&["*"]));
            assert_eq!(router.subscriber_count(), 1);
        }
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_token_removes_subscription() {
        let router = EventRouter::new();
        let token = CancellationToken::new();
        let mut rx = router.subscribe_with_cancel(opts(&["*"]), token.clone());
        assert_eq!(router.subscriber_count(), 1);
        token.cancel();
        // The channel closes once the watcher runs.
        assert!(rx.recv().await.is_none());
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_router_rejects_publishes() {
        let router = EventRouter::new();
        let (mut rx, _sub) = router.subscribe(opts(&["*"]));
        router.close();
        router.publish(ev("task", "created", None));
        assert!(rx.recv().await.is_none());
        router.close(); // idempotent
    }
}
