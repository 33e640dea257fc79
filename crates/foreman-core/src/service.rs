// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The thin API boundary.
//!
//! Transports (HTTP, RPC) call into this layer; every mutation goes
//! through the store and then signals the reconciler by enqueueing — the
//! service never runs a step itself.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use foreman_events::{EventRouter, StreamEvent, SubscribeOptions};
use foreman_store::{MessageRow, NewMessage, NewTask, Store, TaskPhase, TaskRow};

use crate::events::stream_event;
use crate::reconciler::Engine;
use crate::{Error, Result, WorkQueue};

#[derive(Clone)]
pub struct Service {
    store: Store,
    queue: Arc<WorkQueue>,
    router: EventRouter,
}

impl Service {
    pub fn new(engine: &Engine) -> Self {
        Self {
            store: engine.store().clone(),
            queue: engine.queue(),
            router: engine.router(),
        }
    }

    /// Create a task bound to the named agent.
    pub fn create_task(
        &self,
        agent_name: &str,
        project_directory: Option<String>,
    ) -> Result<TaskRow> {
        let agent = self.store.get_agent_by_name(agent_name)?;
        let task = self.store.create_task(NewTask {
            agent_id: agent.id,
            parent_task_id: None,
            project_directory,
        })?;
        self.router.publish(stream_event::task_created(&task));
        Ok(task)
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<TaskRow> {
        Ok(self.store.get_task(task_id)?)
    }

    pub fn list_messages(&self, task_id: Uuid) -> Result<Vec<MessageRow>> {
        Ok(self.store.list_messages(task_id)?)
    }

    pub fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.store.delete_task(task_id)?;
        self.router.publish(stream_event::task_deleted(task_id));
        Ok(())
    }

    /// Append a user message and signal the reconciler.
    pub fn append_user_message(&self, task_id: Uuid, text: &str) -> Result<MessageRow> {
        // Fail fast with NotFound rather than a foreign-key error.
        let _ = self.store.get_task(task_id)?;
        let msg = self.store.insert_message(NewMessage::user_text(task_id, text))?;
        self.router.publish(stream_event::message_created(&msg));
        self.queue.add(task_id);
        Ok(msg)
    }

    /// Explicitly resume a suspended task.
    pub fn resume_task(&self, task_id: Uuid) -> Result<()> {
        let task = self.store.get_task(task_id)?;
        self.store.set_desired_phase(task_id, TaskPhase::Awaiting)?;
        if task.phase == TaskPhase::Suspended {
            self.store.set_task_phase(task_id, TaskPhase::Awaiting)?;
            self.router.publish(stream_event::task_updated(task_id, TaskPhase::Awaiting));
        }
        self.queue.add(task_id);
        Ok(())
    }

    /// Subscribe to the event stream.
    ///
    /// With `replay_after_message_id` (requires a task-scoped subscription)
    /// the stream starts with synthesized `message.created` events for the
    /// rows after that message, then continues live.  Chunk events are
    /// transient and never replayed.
    pub fn subscribe(
        &self,
        opts: SubscribeOptions,
        replay_after_message_id: Option<Uuid>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let replay: Vec<StreamEvent> = match replay_after_message_id {
            None => Vec::new(),
            Some(after) => {
                let Some(task_id) = opts.task_id else {
                    return Err(Error::InvalidArgument(
                        "replay requires a task-scoped subscription".into(),
                    ));
                };
                self.store
                    .messages_after(task_id, after)?
                    .iter()
                    .map(stream_event::message_created)
                    .collect()
            }
        };

        let buffer = opts.buffer.max(1);
        let (live_rx, sub) = self.router.subscribe(opts);
        let (tx, rx) = mpsc::channel(buffer + replay.len().max(1));
        tokio::spawn(async move {
            let _sub = sub; // hold the subscription for the bridge lifetime
            for ev in replay {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
            let mut live = live_rx;
            while let Some(ev) = live.recv().await {
                if tx.send(ev).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_events::EventBus;
    use foreman_store::{NewAgent, NewModel, NewProvider, ProviderType};
    use std::sync::Arc;

    struct NoProvider;

    impl crate::step::ProviderFactory for NoProvider {
        fn provider_for(
            &self,
            _provider: &foreman_store::ProviderRow,
            _model: &foreman_store::ModelRow,
        ) -> Result<Arc<dyn foreman_model::ModelProvider>> {
            Err(Error::Fatal("no provider in this test".into()))
        }
    }

    fn service() -> Service {
        let store = Store::open_in_memory().unwrap();
        let provider = store
            .create_provider(NewProvider {
                provider_type: ProviderType::Mock,
                base_url: None,
                secret: vec![],
            })
            .unwrap();
        let model = store
            .create_model(NewModel {
                provider_id: provider.id,
                name: "m".into(),
                context_window: 1000,
                input_cost: 0.0,
                output_cost: 0.0,
                cache_write_cost: 0.0,
                cache_read_cost: 0.0,
            })
            .unwrap();
        store
            .create_agent(NewAgent {
                name: "helper".into(),
                instructions: "".into(),
                model_id: model.id,
                compaction_enabled: false,
                continue_without_tools: false,
            })
            .unwrap();
        let engine = Engine::new(
            store,
            Arc::new(EventBus::new(64, 1)),
            EventRouter::new(),
            Default::default(),
            Arc::new(NoProvider),
        );
        Service::new(&engine)
    }

    #[tokio::test]
    async fn create_task_publishes_and_resolves_agent() {
        let svc = service();
        let task = svc.create_task("helper", Some("/proj".into())).unwrap();
        assert_eq!(task.phase, TaskPhase::Awaiting);
        assert!(svc.create_task("ghost", None).is_err());
    }

    #[tokio::test]
    async fn append_message_enqueues_task() {
        let svc = service();
        let task = svc.create_task("helper", None).unwrap();
        svc.append_user_message(task.id, "hello").unwrap();
        assert_eq!(svc.queue.len(), 1);
        let msgs = svc.list_messages(task.id).unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn append_to_missing_task_is_not_found() {
        let svc = service();
        let err = svc.append_user_message(Uuid::new_v4(), "x").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn replay_requires_task_scope() {
        let svc = service();
        let err = svc
            .subscribe(SubscribeOptions::default(), Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn replay_prepends_messages_after_the_given_id() {
        let svc = service();
        let task = svc.create_task("helper", None).unwrap();
        let first = svc.append_user_message(task.id, "first").unwrap();
        let second = svc.append_user_message(task.id, "second").unwrap();

        let mut rx = svc
            .subscribe(
                SubscribeOptions {
                    event_types: vec!["message.*".into()],
                    task_id: Some(task.id),
                    ..Default::default()
                },
                Some(first.id),
            )
            .unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.action, "created");
        assert_eq!(ev.payload["message_id"], second.id.to_string());
    }

    #[tokio::test]
    async fn resume_lifts_suspension_and_enqueues() {
        let svc = service();
        let task = svc.create_task("helper", None).unwrap();
        svc.store.set_desired_phase(task.id, TaskPhase::Suspended).unwrap();
        svc.store.set_task_phase(task.id, TaskPhase::Suspended).unwrap();

        svc.resume_task(task.id).unwrap();
        let t = svc.store.get_task(task.id).unwrap();
        assert_eq!(t.phase, TaskPhase::Awaiting);
        assert_eq!(t.desired_phase, TaskPhase::Awaiting);
        assert_eq!(svc.queue.len(), 1);
    }
}
