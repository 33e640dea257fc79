// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use uuid::Uuid;

use foreman_store::{MessageRow, TaskPhase, TaskRow};

/// Internal bus event published whenever a task's phase changes.
/// `await_tasks` subscribes to these instead of hot-polling the store.
#[derive(Debug, Clone)]
pub struct TaskChanged {
    pub task_id: Uuid,
    pub phase: TaskPhase,
}

/// Constructors for the domain events streamed through the router.
pub mod stream_event {
    use foreman_events::StreamEvent;
    use serde_json::json;

    use super::*;

    pub fn task_created(task: &TaskRow) -> StreamEvent {
        StreamEvent::new("task", "created", Some(task.id), task_payload(task))
    }

    pub fn task_updated(task_id: Uuid, phase: TaskPhase) -> StreamEvent {
        StreamEvent::new(
            "task",
            "updated",
            Some(task_id),
            json!({ "phase": phase.as_str() }),
        )
    }

    pub fn task_deleted(task_id: Uuid) -> StreamEvent {
        StreamEvent::new("task", "deleted", Some(task_id), json!({}))
    }

    /// A question raised by `ask_user`; the answer arrives as a later user
    /// message.
    pub fn task_question(task_id: Uuid, question: &str) -> StreamEvent {
        StreamEvent::new("task", "updated", Some(task_id), json!({ "question": question }))
    }

    /// The final report a `submit_report` call produced.
    pub fn task_report(task_id: Uuid, report: &str) -> StreamEvent {
        StreamEvent::new("task", "updated", Some(task_id), json!({ "report": report }))
    }

    /// The note a `handoff` call left about what remains.
    pub fn task_handoff(task_id: Uuid, reason: &str) -> StreamEvent {
        StreamEvent::new(
            "task",
            "updated",
            Some(task_id),
            json!({ "handoff_reason": reason }),
        )
    }

    pub fn message_created(msg: &MessageRow) -> StreamEvent {
        StreamEvent::new(
            "message",
            "created",
            Some(msg.task_id),
            json!({
                "message_id": msg.id,
                "source": msg.source.as_str(),
                "blocks": msg.blocks,
                "from_task_id": msg.from_task_id,
            }),
        )
    }

    /// Transient streaming chunk; never replayed.
    pub fn message_chunk(
        task_id: Uuid,
        message_id: Uuid,
        chunk_index: usize,
        delta: &str,
    ) -> StreamEvent {
        StreamEvent::new(
            "message",
            "chunk",
            Some(task_id),
            json!({
                "message_id": message_id,
                "chunk_index": chunk_index,
                "delta": delta,
            }),
        )
    }

    pub fn tool_called(task_id: Uuid, call_id: &str, script: &str) -> StreamEvent {
        StreamEvent::new(
            "tool",
            "called",
            Some(task_id),
            json!({ "call_id": call_id, "script": script }),
        )
    }

    pub fn tool_result(task_id: Uuid, call_id: &str, succeeded: bool) -> StreamEvent {
        StreamEvent::new(
            "tool",
            "result",
            Some(task_id),
            json!({ "call_id": call_id, "succeeded": succeeded }),
        )
    }

    pub fn step_failed(task_id: Uuid, error: &str, fatal: bool) -> StreamEvent {
        StreamEvent::new(
            "internal.reconciler",
            "updated",
            Some(task_id),
            json!({ "error": error, "fatal": fatal }),
        )
    }

    fn task_payload(task: &TaskRow) -> serde_json::Value {
        json!({
            "agent_id": task.agent_id,
            "parent_task_id": task.parent_task_id,
            "phase": task.phase.as_str(),
            "project_directory": task.project_directory,
        })
    }
}
