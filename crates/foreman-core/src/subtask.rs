// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Parent/child scheduling primitives, callable from interpreter scripts.
//!
//! `spawn_task` creates and enqueues a child and parks the parent's desired
//! phase at suspended; `send_message` posts a task-source message to the
//! parent; `await_tasks` blocks (inside the parent's step) until the named
//! children run out of work, collecting what they sent back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use foreman_events::{EventBus, EventRouter};
use foreman_interp::{HostTool, Session, ToolError};
use foreman_store::{MessageSource, NewMessage, Store, TaskPhase, TaskRow};

use crate::events::{stream_event, TaskChanged};
use crate::WorkQueue;

/// Engine facilities the subtask tools close over; built once per step for
/// the task being stepped.
pub struct SubtaskCtx {
    pub store: Store,
    pub queue: Arc<WorkQueue>,
    pub bus: Arc<EventBus>,
    pub router: EventRouter,
    pub task: TaskRow,
    pub await_timeout: Duration,
}

pub struct SpawnTaskTool {
    pub ctx: Arc<SubtaskCtx>,
}

#[async_trait]
impl HostTool for SpawnTaskTool {
    fn name(&self) -> &str {
        "spawn_task"
    }

    fn description(&self) -> &str {
        "Spawn a subtask handled by the named agent, seeded with the given \
         prompt. Returns {task_id}. Combine with await_tasks to collect the \
         subtask's messages."
    }

    fn signature(&self) -> String {
        "spawn_task(agent_name, prompt)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Agent to run the subtask" },
                { "type": "string", "description": "Initial user prompt" }
            ]
        })
    }

    async fn call(&self, _session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let agent_name = required_str(args, 0, "agent_name")?;
        let prompt = required_str(args, 1, "prompt")?;

        let agent = match self.ctx.store.get_agent_by_name(agent_name) {
            Ok(agent) => agent,
            Err(e) if e.is_not_found() => {
                let known = self.ctx.store.list_agent_names().unwrap_or_default();
                return Err(ToolError::not_found(format!("no agent named '{agent_name}'"))
                    .with_suggestions(known));
            }
            Err(e) => return Err(ToolError::internal(e.to_string())),
        };

        let (child, msg) = self
            .ctx
            .store
            .spawn_child(&self.ctx.task, agent.id, prompt)
            .map_err(|e| ToolError::internal(e.to_string()))?;

        debug!(parent = %self.ctx.task.id, child = %child.id, agent = %agent.name, "spawned subtask");

        self.ctx.queue.add(child.id);
        self.ctx.router.publish(stream_event::task_created(&child));
        self.ctx.router.publish(stream_event::message_created(&msg));
        self.ctx.bus.publish(TaskChanged { task_id: child.id, phase: child.phase });

        Ok(json!({ "task_id": child.id }))
    }
}

pub struct SendMessageTool {
    pub ctx: Arc<SubtaskCtx>,
}

#[async_trait]
impl HostTool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to another task. Only to='parent' is supported; \
         returns {delivered} and, when the task has no parent, an error \
         field."
    }

    fn signature(&self) -> String {
        "send_message(to, content)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "enum": ["parent"] },
                { "type": "string", "description": "Message content" }
            ]
        })
    }

    async fn call(&self, _session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let to = required_str(args, 0, "to")?;
        let content = required_str(args, 1, "content")?;

        if to != "parent" {
            return Err(ToolError::invalid(format!(
                "unsupported recipient '{to}'; only 'parent' is supported"
            )));
        }
        let Some(parent_id) = self.ctx.task.parent_task_id else {
            return Ok(json!({ "delivered": false, "error": "task has no parent" }));
        };

        let msg = self
            .ctx
            .store
            .insert_message(NewMessage {
                id: None,
                task_id: parent_id,
                source: MessageSource::Task,
                blocks: vec![foreman_store::MessageBlock::text(content)],
                usage: None,
                from_task_id: Some(self.ctx.task.id),
                processed: false,
            })
            .map_err(|e| ToolError::internal(e.to_string()))?;

        self.ctx.queue.add(parent_id);
        self.ctx.router.publish(stream_event::message_created(&msg));

        Ok(json!({ "delivered": true, "message_id": msg.id }))
    }
}

pub struct AwaitTasksTool {
    pub ctx: Arc<SubtaskCtx>,
}

#[async_trait]
impl HostTool for AwaitTasksTool {
    fn name(&self) -> &str {
        "await_tasks"
    }

    fn description(&self) -> &str {
        "Wait until the given subtasks (direct children only) have no more \
         work, then return the messages they sent to this task. Returns \
         {completed, messages} or, on timeout, {completed: false, \
         incomplete: [...]}. Default timeout 300s."
    }

    fn signature(&self) -> String {
        "await_tasks(task_ids, timeout_seconds?)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "array", "items": { "type": "string" }, "description": "Child task ids" },
                { "type": "integer", "description": "Timeout in seconds" }
            ]
        })
    }

    async fn call(&self, _session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let ids: Vec<Uuid> = args
            .first()
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::invalid("missing required argument 'task_ids' (array)"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| ToolError::invalid(format!("not a task id: {v}")))
            })
            .collect::<Result<_, _>>()?;
        if ids.is_empty() {
            return Err(ToolError::invalid("task_ids must not be empty"));
        }
        let timeout = args
            .get(1)
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.ctx.await_timeout);

        // Only direct children may be awaited.
        for id in &ids {
            let child = self
                .ctx
                .store
                .get_task(*id)
                .map_err(|e| ToolError::not_found(e.to_string()))?;
            if child.parent_task_id != Some(self.ctx.task.id) {
                return Err(ToolError::invalid(format!(
                    "task {id} is not a direct child of this task"
                )));
            }
        }

        // Event-driven wait with a poll fallback: phase changes publish
        // `TaskChanged`, but the DB is the source of truth.
        let watched = ids.clone();
        let (mut rx, _sub) = self.ctx.bus.subscribe_channel::<TaskChanged, _>(
            64,
            Some(move |ev: &TaskChanged| watched.contains(&ev.task_id)),
        );

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let incomplete = self.incomplete_children(&ids)?;
            if incomplete.is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(json!({ "completed": false, "incomplete": incomplete }));
            }
            tokio::select! {
                _ = rx.recv() => {}
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(250))) => {}
            }
        }

        // Collect what the children sent us, oldest first, and consume it
        // so the reconciler does not feed the same messages to the model
        // again.
        let collected = self
            .ctx
            .store
            .child_messages(self.ctx.task.id, &ids)
            .map_err(|e| ToolError::internal(e.to_string()))?;
        for m in &collected {
            self.ctx
                .store
                .mark_message_processed(m.id)
                .map_err(|e| ToolError::internal(e.to_string()))?;
        }

        // The await is over: lift the suspension spawn_task requested.
        self.ctx
            .store
            .set_desired_phase(self.ctx.task.id, TaskPhase::Awaiting)
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let messages: Vec<Value> = collected
            .iter()
            .map(|m| {
                json!({
                    "from_task_id": m.from_task_id,
                    "content": m.text(),
                })
            })
            .collect();
        Ok(json!({ "completed": true, "messages": messages }))
    }
}

impl AwaitTasksTool {
    /// Children that still have work: a running step or unprocessed input.
    fn incomplete_children(&self, ids: &[Uuid]) -> Result<Vec<String>, ToolError> {
        let mut incomplete = Vec::new();
        for id in ids {
            let child = self
                .ctx
                .store
                .get_task(*id)
                .map_err(|e| ToolError::internal(e.to_string()))?;
            let pending = self
                .ctx
                .store
                .unprocessed_count(*id)
                .map_err(|e| ToolError::internal(e.to_string()))?;
            let done = pending == 0
                && matches!(child.phase, TaskPhase::Awaiting | TaskPhase::Suspended);
            if !done {
                incomplete.push(id.to_string());
            }
        }
        Ok(incomplete)
    }
}

fn required_str<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, ToolError> {
    args.get(idx)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid(format!("missing required argument '{name}' (string)")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_interp::ScopedFs;
    use foreman_store::{NewAgent, NewModel, NewProvider, NewTask, ProviderType};

    fn fixture() -> (Arc<SubtaskCtx>, TaskRow) {
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
        for name in ["reviewer", "researcher"] {
            store
                .create_agent(NewAgent {
                    name: name.into(),
                    instructions: "".into(),
                    model_id: model.id,
                    compaction_enabled: false,
                    continue_without_tools: false,
                })
                .unwrap();
        }
        let agent = store.get_agent_by_name("reviewer").unwrap();
        let task = store
            .create_task(NewTask {
                agent_id: agent.id,
                parent_task_id: None,
                project_directory: Some("/proj".into()),
            })
            .unwrap();
        let ctx = Arc::new(SubtaskCtx {
            store,
            queue: Arc::new(WorkQueue::new()),
            bus: Arc::new(EventBus::new(64, 1)),
            router: EventRouter::new(),
            task: task.clone(),
            await_timeout: Duration::from_secs(300),
        });
        (ctx, task)
    }

    fn session() -> Session {
        Session::new(ScopedFs::unscoped())
    }

    #[tokio::test]
    async fn spawn_task_creates_enqueued_child() {
        let (ctx, parent) = fixture();
        let tool = SpawnTaskTool { ctx: Arc::clone(&ctx) };
        let out = tool
            .call(&session(), &[json!("reviewer"), json!("check X")])
            .await
            .unwrap();
        let child_id: Uuid = serde_json::from_value(out["task_id"].clone()).unwrap();

        let child = ctx.store.get_task(child_id).unwrap();
        assert_eq!(child.parent_task_id, Some(parent.id));
        assert_eq!(child.project_directory.as_deref(), Some("/proj"));
        assert_eq!(ctx.queue.len(), 1, "child is enqueued");
        assert_eq!(
            ctx.store.get_task(parent.id).unwrap().desired_phase,
            TaskPhase::Suspended
        );
    }

    #[tokio::test]
    async fn spawn_task_unknown_agent_suggests_names() {
        let (ctx, _) = fixture();
        let tool = SpawnTaskTool { ctx };
        let err = tool
            .call(&session(), &[json!("reviwer"), json!("x")])
            .await
            .unwrap_err();
        assert!(err.suggestions.contains(&"reviewer".to_string()));
        assert!(err.suggestions.contains(&"researcher".to_string()));
    }

    #[tokio::test]
    async fn send_message_without_parent_reports_undelivered() {
        let (ctx, _) = fixture();
        let tool = SendMessageTool { ctx };
        let out = tool
            .call(&session(), &[json!("parent"), json!("hello?")])
            .await
            .unwrap();
        assert_eq!(out["delivered"], false);
    }

    #[tokio::test]
    async fn send_message_to_parent_inserts_task_source_row() {
        let (ctx, parent) = fixture();
        // Make a child context.
        let agent = ctx.store.get_agent_by_name("reviewer").unwrap();
        let (child, _) = ctx.store.spawn_child(&parent, agent.id, "go").unwrap();
        let child_ctx = Arc::new(SubtaskCtx {
            store: ctx.store.clone(),
            queue: Arc::clone(&ctx.queue),
            bus: Arc::clone(&ctx.bus),
            router: ctx.router.clone(),
            task: child,
            await_timeout: Duration::from_secs(300),
        });

        let tool = SendMessageTool { ctx: Arc::clone(&child_ctx) };
        let out = tool
            .call(&session(), &[json!("parent"), json!("done: looks good")])
            .await
            .unwrap();
        assert_eq!(out["delivered"], true);

        let inbox = ctx.store.list_messages(parent.id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].source, MessageSource::Task);
        assert_eq!(inbox[0].from_task_id, Some(child_ctx.task.id));
    }

    #[tokio::test]
    async fn await_rejects_non_children() {
        let (ctx, _) = fixture();
        let agent = ctx.store.get_agent_by_name("reviewer").unwrap();
        // A stranger task, not a child.
        let stranger = ctx
            .store
            .create_task(NewTask { agent_id: agent.id, parent_task_id: None, project_directory: None })
            .unwrap();
        let tool = AwaitTasksTool { ctx };
        let err = tool
            .call(&session(), &[json!([stranger.id.to_string()]), json!(1)])
            .await
            .unwrap_err();
        assert!(err.message.contains("not a direct child"));
    }

    #[tokio::test]
    async fn await_times_out_with_incomplete_ids() {
        let (ctx, parent) = fixture();
        let agent = ctx.store.get_agent_by_name("reviewer").unwrap();
        let (child, _) = ctx.store.spawn_child(&parent, agent.id, "never finishes").unwrap();
        let tool = AwaitTasksTool { ctx };
        let out = tool
            .call(&session(), &[json!([child.id.to_string()]), json!(1)])
            .await
            .unwrap();
        assert_eq!(out["completed"], false);
        assert_eq!(out["incomplete"][0], child.id.to_string());
    }

    #[tokio::test]
    async fn await_returns_child_messages_and_lifts_suspension() {
        let (ctx, parent) = fixture();
        let agent = ctx.store.get_agent_by_name("reviewer").unwrap();
        let (child, seed) = ctx.store.spawn_child(&parent, agent.id, "work").unwrap();

        // Simulate the child finishing: consume its input and post back.
        ctx.store.mark_message_processed(seed.id).unwrap();
        ctx.store
            .insert_message(NewMessage {
                id: None,
                task_id: parent.id,
                source: MessageSource::Task,
                blocks: vec![foreman_store::MessageBlock::text("report: all fine")],
                usage: None,
                from_task_id: Some(child.id),
                processed: false,
            })
            .unwrap();

        let tool = AwaitTasksTool { ctx: Arc::clone(&ctx) };
        let out = tool
            .call(&session(), &[json!([child.id.to_string()]), json!(5)])
            .await
            .unwrap();
        assert_eq!(out["completed"], true);
        assert_eq!(out["messages"][0]["content"], "report: all fine");

        // The collected message is consumed and the parent is released.
        let inbox = ctx.store.list_messages(parent.id).unwrap();
        assert!(inbox[0].is_processed());
        assert_eq!(
            ctx.store.get_task(parent.id).unwrap().desired_phase,
            TaskPhase::Awaiting
        );
    }
}
