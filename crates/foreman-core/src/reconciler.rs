// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use foreman_config::Config;
use foreman_events::{EventBus, EventRouter};
use foreman_store::Store;

use crate::events::stream_event;
use crate::step::{run_step, EngineDeps, ProviderFactory, StepOutcome};
use crate::{Error, WorkQueue};

/// The reconciliation engine: owns the work queue and the worker pool.
///
/// Workers dequeue task ids and run one step at a time; a task with more
/// work is re-enqueued after `done`, never stepped concurrently.  Shutdown
/// drains the queue, waits out the grace period, then cancels in-flight
/// steps at their next suspension point.
pub struct Engine {
    deps: Arc<EngineDeps>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        store: Store,
        bus: Arc<EventBus>,
        router: EventRouter,
        config: Config,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let deps = Arc::new(EngineDeps {
            store,
            bus,
            router,
            queue: Arc::new(WorkQueue::new()),
            config,
            factory,
        });
        Self { deps, cancel: CancellationToken::new(), workers: Mutex::new(Vec::new()) }
    }

    pub fn store(&self) -> &Store {
        &self.deps.store
    }

    pub fn router(&self) -> EventRouter {
        self.deps.router.clone()
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.deps.queue)
    }

    /// Signal that a task has work.  The queue is the only entry path to
    /// the step function.
    pub fn enqueue(&self, task_id: Uuid) {
        self.deps.queue.add(task_id);
    }

    /// Spawn the worker pool.
    pub fn start(&self) {
        let count = self.deps.config.reconciler.workers.max(1);
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..count {
            let deps = Arc::clone(&self.deps);
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(worker_loop(deps, cancel, worker_id)));
        }
        debug!(workers = count, "reconciler started");
    }

    /// Graceful shutdown: drain the queue, let running steps finish within
    /// the grace period, then interrupt whatever remains.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.deps.config.reconciler.shutdown_grace_secs);
        self.deps.queue.drain();

        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };
        let join_all = futures::future::join_all(handles);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!("grace period elapsed; interrupting in-flight steps");
            self.cancel.cancel();
            // Workers observe the cancellation at their next suspension
            // point; give them a moment before the process exits.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        debug!("reconciler stopped");
    }
}

async fn worker_loop(deps: Arc<EngineDeps>, cancel: CancellationToken, worker_id: usize) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            id = deps.queue.get() => id,
        };
        let Some(task_id) = next else { break };

        let outcome = run_step(&deps, &cancel, task_id).await;
        deps.queue.done(task_id);

        match outcome {
            Ok(StepOutcome::Completed { reenqueue: true }) => deps.queue.add(task_id),
            Ok(StepOutcome::Cancelled) => {
                debug!(worker_id, task_id = %task_id, "step cancelled; task stays scheduled");
                deps.queue.add(task_id);
            }
            Ok(_) => {}
            Err(e) if e.is_retryable() => {
                warn!(worker_id, task_id = %task_id, error = %e, "step failed; re-enqueueing");
                deps.queue.add(task_id);
            }
            Err(e) => {
                error!(worker_id, task_id = %task_id, error = %e, "step failed fatally");
                let fatal = matches!(e, Error::Fatal(_));
                deps.router.publish(stream_event::step_failed(
                    task_id,
                    &e.sanitized_message(),
                    fatal,
                ));
            }
        }
    }
    debug!(worker_id, "worker exited");
}
