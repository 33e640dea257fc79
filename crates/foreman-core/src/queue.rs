// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use uuid::Uuid;

struct Inner {
    queue: VecDeque<Uuid>,
    queued: HashSet<Uuid>,
    /// Ids currently held by a worker (between `get` and `done`).
    active: HashSet<Uuid>,
    /// Ids re-added while active; re-admitted on `done`.
    dirty: HashSet<Uuid>,
    draining: bool,
}

/// Deduplicating work queue of task ids.
///
/// The discipline is the controller work-queue one: adding an id that is
/// already queued is a no-op; adding an id that a worker currently holds
/// marks it dirty, and `done` re-admits it.  This is what guarantees that
/// at most one step per task is ever in flight.
///
/// `drain` puts the queue into shutdown mode: `add` becomes a no-op and
/// `get` returns `None` once the backlog is empty.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                active: HashSet::new(),
                dirty: HashSet::new(),
                draining: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Signal that a task has work.  No-op while the id is already queued
    /// or the queue is draining; defers to `done` while the id is active.
    pub fn add(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.draining {
            return;
        }
        if inner.active.contains(&id) {
            inner.dirty.insert(id);
            return;
        }
        if inner.queued.insert(id) {
            inner.queue.push_back(id);
            self.notify.notify_one();
        }
    }

    /// Take the next task id, waiting for work.  Returns `None` when the
    /// queue is draining and empty — the worker's signal to exit.
    pub async fn get(&self) -> Option<Uuid> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(id) = inner.queue.pop_front() {
                    inner.queued.remove(&id);
                    inner.active.insert(id);
                    return Some(id);
                }
                if inner.draining {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release an id a worker finished with; re-admits it if it was
    /// re-added while active.
    pub fn done(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active.remove(&id);
        if inner.dirty.remove(&id) && !inner.draining && inner.queued.insert(id) {
            inner.queue.push_back(id);
            self.notify.notify_one();
        }
    }

    /// Enter drain mode: stop accepting work and wake every waiting worker
    /// so they can observe shutdown.
    pub fn drain(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.draining = true;
        }
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
