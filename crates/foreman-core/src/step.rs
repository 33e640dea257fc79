// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One pass of the per-task reconciliation loop.
//!
//! The step is idempotent around the `processed_time` marker: the model
//! turn commits "picked processed + assistant inserted + usage added" in
//! one transaction, and tool results commit "results inserted + assistant
//! processed" in another.  A crash between the two leaves an unprocessed
//! assistant message, which the next step picks up and re-interprets
//! without calling the model again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use foreman_config::Config;
use foreman_events::{EventBus, EventRouter};
use foreman_interp::{Interpreter, ScopedFs, Session};
use foreman_model::{CompletionRequest, ModelProvider};
use foreman_store::{
    MessageBlock, MessageRow, MessageSource, ModelRow, NewMessage, ProviderRow, SecretCipher,
    Store, TaskPhase, TaskRow, TaskSummaryRow,
};
use foreman_tools::{ToolOptions, HANDOFF_REASON_KEY, QUESTION_KEY, REPORT_KEY, TERMINAL_KEY};

use crate::compact;
use crate::convert;
use crate::events::{stream_event, TaskChanged};
use crate::llm::collect_response;
use crate::prompts;
use crate::subtask::{AwaitTasksTool, SendMessageTool, SpawnTaskTool, SubtaskCtx};
use crate::{Error, Result, WorkQueue};
use tokio_util::sync::CancellationToken;

/// Builds a provider for a stored provider/model pair.  Swappable so tests
/// drive the engine with the scripted mock.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(
        &self,
        provider: &ProviderRow,
        model: &ModelRow,
    ) -> Result<Arc<dyn ModelProvider>>;
}

/// Production factory: decrypts the stored credential and builds the
/// matching HTTP provider.
pub struct DefaultProviderFactory {
    pub cipher: SecretCipher,
}

impl ProviderFactory for DefaultProviderFactory {
    fn provider_for(
        &self,
        provider: &ProviderRow,
        model: &ModelRow,
    ) -> Result<Arc<dyn ModelProvider>> {
        let key = self
            .cipher
            .decrypt(&provider.secret)
            .map_err(|e| Error::Fatal(format!("provider credential: {e}")))?;
        foreman_model::build_provider(
            provider.provider_type.as_str(),
            &model.name,
            key,
            provider.base_url.clone(),
            0,
        )
        .map_err(|e| Error::Fatal(e.to_string()))
    }
}

/// Everything a worker needs to run steps.
pub struct EngineDeps {
    pub store: Store,
    pub bus: Arc<EventBus>,
    pub router: EventRouter,
    pub queue: Arc<WorkQueue>,
    pub config: Config,
    pub factory: Arc<dyn ProviderFactory>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No unprocessed message; nothing was done.
    NoWork,
    /// The step ran to completion.
    Completed { reenqueue: bool },
    /// The step was interrupted mid-interpretation; no tool result was
    /// written and the task should be attempted again.
    Cancelled,
}

pub async fn run_step(
    deps: &EngineDeps,
    cancel: &CancellationToken,
    task_id: Uuid,
) -> Result<StepOutcome> {
    let task = deps.store.get_task(task_id)?;
    let agent = deps.store.get_agent(task.agent_id).map_err(binding_fatal)?;
    let model = deps.store.get_model(agent.model_id).map_err(binding_fatal)?;
    let provider_row = deps.store.get_provider(model.provider_id).map_err(binding_fatal)?;

    let messages = deps.store.list_messages(task_id)?;
    let Some(picked) = pick_next(&messages).cloned() else {
        apply_resting_phase(deps, task_id)?;
        return Ok(StepOutcome::NoWork);
    };

    set_phase(deps, task_id, TaskPhase::Running)?;

    // Crash recovery: an unprocessed assistant message means the model turn
    // committed but its tool calls were never interpreted.
    if picked.source == MessageSource::Assistant {
        return interpret_tool_calls(deps, cancel, &task, &picked).await;
    }

    let provider = deps.factory.provider_for(&provider_row, &model)?;

    if agent.compaction_enabled {
        let trigger =
            (model.context_window as f64 * deps.config.compaction.trigger_fraction as f64) as u64;
        if compact::should_compact(&messages, trigger) {
            if let Err(e) = compact::run_compaction(
                &deps.store,
                provider.as_ref(),
                &task,
                &model,
                &deps.config.compaction,
                &messages,
            )
            .await
            {
                warn!(task_id = %task_id, error = %e, "compaction failed; continuing without truncation");
            }
        }
    }

    // Input assembly: system prompt (instructions + tool catalog + summary),
    // then the retained processed history and the picked message.
    let task = deps.store.get_task(task_id)?; // reload; compaction may have moved the anchor
    let summary = deps.store.get_task_summary(task_id)?;
    let toolset = build_toolset(deps, &task);
    let catalog = foreman_tools::render_catalog(&toolset);
    let system = prompts::system_prompt(
        &agent.instructions,
        &catalog,
        summary.as_ref().map(|s| &s.content),
    );
    let history = input_history(&messages, &picked, summary.as_ref());
    let model_msgs = convert::to_model_messages(&history)?;

    let assistant_id = Uuid::new_v4();
    let req = CompletionRequest {
        system,
        messages: model_msgs,
        tools: vec![prompts::code_interpreter_decl()],
        max_tokens: 0,
    };
    let stream = provider
        .complete(req)
        .await
        .map_err(|e| Error::Transient(format!("model call failed: {e}")))?;
    let router = deps.router.clone();
    let collected = collect_response(stream, |chunk_index, delta| {
        router.publish(stream_event::message_chunk(task_id, assistant_id, chunk_index, delta));
    })
    .await
    .map_err(|e| Error::Transient(format!("model stream failed: {e}")))?;

    let blocks = convert::blocks_from_model(&collected.blocks);
    let has_tool_calls = blocks.iter().any(|b| b.is_tool_call());
    let assistant = NewMessage {
        id: Some(assistant_id),
        task_id,
        source: MessageSource::Assistant,
        blocks,
        usage: Some(collected.usage),
        from_task_id: None,
        // Tool-call turns stay unprocessed until their results commit.
        processed: !has_tool_calls,
    };
    let assistant_row = deps.store.commit_turn(picked.id, assistant, &model)?;
    deps.router.publish(stream_event::message_created(&assistant_row));

    if !has_tool_calls {
        let reenqueue = agent.continue_without_tools;
        finish_step(deps, task_id, reenqueue)?;
        return Ok(StepOutcome::Completed { reenqueue });
    }

    interpret_tool_calls(deps, cancel, &task, &assistant_row).await
}

/// Run every tool_call block of an assistant message through the
/// interpreter and commit the results as one system-source message.
async fn interpret_tool_calls(
    deps: &EngineDeps,
    cancel: &CancellationToken,
    task: &TaskRow,
    assistant: &MessageRow,
) -> Result<StepOutcome> {
    let fs = match &task.project_directory {
        Some(dir) => ScopedFs::new(dir),
        None => ScopedFs::unscoped(),
    };
    let interpreter = Interpreter::new(Arc::new(build_toolset(deps, task)));

    let mut result_blocks = Vec::new();
    let mut terminal = false;
    for block in assistant.tool_calls() {
        let MessageBlock::ToolCall { id, name, input } = block else {
            continue;
        };
        if name != "code_interpreter" {
            result_blocks.push(MessageBlock::ToolResult {
                id: id.clone(),
                name: name.clone(),
                output: json!({ "error": format!("unknown tool: {name}") }),
                succeeded: false,
            });
            continue;
        }
        let Some(script) = input.get("script").and_then(|v| v.as_str()) else {
            result_blocks.push(MessageBlock::ToolResult {
                id: id.clone(),
                name: name.clone(),
                output: json!({ "error": "missing 'script' input" }),
                succeeded: false,
            });
            continue;
        };

        deps.router.publish(stream_event::tool_called(task.id, id, script));
        let session = Arc::new(Session::new(fs.clone()));
        let outcome = interpreter
            .run(cancel, Arc::clone(&session), script)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        if outcome.cancelled {
            // No tool_result is written for an interrupted call; the task
            // is re-attempted later and re-interprets this assistant turn.
            return Ok(StepOutcome::Cancelled);
        }

        let succeeded = outcome.error.is_none();
        deps.router.publish(stream_event::tool_result(task.id, id, succeeded));
        result_blocks.push(MessageBlock::ToolResult {
            id: id.clone(),
            name: name.clone(),
            output: json!({
                "console": outcome.console,
                "executions": outcome.executions,
                "error": outcome.error,
            }),
            succeeded,
        });

        // Out-of-band signals the script left in the session bag.
        if let Some(q) = session.bag_get(QUESTION_KEY).and_then(as_json_string) {
            deps.router.publish(stream_event::task_question(task.id, &q));
        }
        if let Some(r) = session.bag_get(REPORT_KEY).and_then(as_json_string) {
            deps.router.publish(stream_event::task_report(task.id, &r));
        }
        if let Some(reason) = session.bag_get(HANDOFF_REASON_KEY).and_then(as_json_string) {
            deps.router.publish(stream_event::task_handoff(task.id, &reason));
        }
        if session.bag_get(TERMINAL_KEY).is_some() {
            terminal = true;
        }
    }

    if result_blocks.is_empty() {
        // Recovered assistant turn with nothing interpretable: close it out
        // without fabricating an empty result message.
        deps.store.mark_message_processed(assistant.id)?;
        finish_step(deps, task.id, false)?;
        return Ok(StepOutcome::Completed { reenqueue: false });
    }

    // A terminal signal (submit_report, handoff) ends the loop here: the
    // results are committed pre-consumed so the task has no more work,
    // instead of spending one more model turn acknowledging them.
    let results = NewMessage {
        id: None,
        task_id: task.id,
        source: MessageSource::System,
        blocks: result_blocks,
        usage: None,
        from_task_id: None,
        processed: terminal,
    };
    let row = deps.store.commit_tool_results(assistant.id, results)?;
    deps.router.publish(stream_event::message_created(&row));

    let reenqueue = !terminal;
    finish_step(deps, task.id, reenqueue)?;
    Ok(StepOutcome::Completed { reenqueue })
}

fn as_json_string(v: serde_json::Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

/// The standard host functions plus the subtask primitives bound to this
/// task.
fn build_toolset(deps: &EngineDeps, task: &TaskRow) -> foreman_interp::ToolSet {
    let opts = ToolOptions {
        result_char_cap: deps.config.interpreter.result_char_cap,
        command_timeout_secs: deps.config.interpreter.command_timeout_secs,
        allow_network: deps.config.interpreter.allow_network,
    };
    let mut set = foreman_tools::standard_toolset(&opts);
    let ctx = Arc::new(SubtaskCtx {
        store: deps.store.clone(),
        queue: Arc::clone(&deps.queue),
        bus: Arc::clone(&deps.bus),
        router: deps.router.clone(),
        task: task.clone(),
        await_timeout: Duration::from_secs(deps.config.subtask.await_timeout_secs),
    });
    set.register(SpawnTaskTool { ctx: Arc::clone(&ctx) });
    set.register(SendMessageTool { ctx: Arc::clone(&ctx) });
    set.register(AwaitTasksTool { ctx });
    set
}

/// Next unprocessed message by pick priority (system > user > task >
/// assistant), earliest first within a priority class.
pub(crate) fn pick_next(messages: &[MessageRow]) -> Option<&MessageRow> {
    messages
        .iter()
        .filter(|m| !m.is_processed())
        .min_by_key(|m| (m.source.pick_rank(), m.create_time))
}

/// The model input: processed history plus the picked message, cut at the
/// summary anchor when one exists.
fn input_history(
    messages: &[MessageRow],
    picked: &MessageRow,
    summary: Option<&TaskSummaryRow>,
) -> Vec<MessageRow> {
    let start = summary
        .and_then(|s| messages.iter().position(|m| m.id == s.message_anchor))
        .unwrap_or(0);
    messages[start..]
        .iter()
        .filter(|m| m.is_processed() || m.id == picked.id)
        .cloned()
        .collect()
}

fn binding_fatal(e: foreman_store::StoreError) -> Error {
    if e.is_not_found() {
        Error::Fatal(format!("misconfigured task binding: {e}"))
    } else {
        e.into()
    }
}

fn set_phase(deps: &EngineDeps, task_id: Uuid, phase: TaskPhase) -> Result<()> {
    deps.store.set_task_phase(task_id, phase)?;
    deps.bus.publish(TaskChanged { task_id, phase });
    deps.router.publish(stream_event::task_updated(task_id, phase));
    Ok(())
}

/// After a completed step (or an idle poke): a re-enqueued task goes back
/// to awaiting; a task with no further work honours `desired_phase`.
fn finish_step(deps: &EngineDeps, task_id: Uuid, reenqueue: bool) -> Result<()> {
    if reenqueue {
        return set_phase(deps, task_id, TaskPhase::Awaiting);
    }
    apply_resting_phase(deps, task_id)
}

fn apply_resting_phase(deps: &EngineDeps, task_id: Uuid) -> Result<()> {
    let task = deps.store.get_task(task_id)?;
    let phase = if task.desired_phase == TaskPhase::Suspended {
        TaskPhase::Suspended
    } else {
        TaskPhase::Awaiting
    };
    if task.phase != phase {
        set_phase(deps, task_id, phase)?;
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(source: MessageSource, processed: bool, offset_ms: i64) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            source,
            blocks: vec![MessageBlock::text("x")],
            usage: None,
            processed_time: processed.then(Utc::now),
            from_task_id: None,
            create_time: Utc::now() + chrono::Duration::milliseconds(offset_ms),
        }
    }

    #[test]
    fn pick_prefers_system_over_user_over_task_over_assistant() {
        let msgs = vec![
            row(MessageSource::Assistant, false, 0),
            row(MessageSource::Task, false, 1),
            row(MessageSource::User, false, 2),
            row(MessageSource::System, false, 3),
        ];
        assert_eq!(pick_next(&msgs).unwrap().source, MessageSource::System);
    }

    #[test]
    fn pick_skips_processed_messages() {
        let msgs = vec![row(MessageSource::System, true, 0), row(MessageSource::User, false, 1)];
        assert_eq!(pick_next(&msgs).unwrap().source, MessageSource::User);
    }

    #[test]
    fn pick_is_fifo_within_a_priority() {
        let first = row(MessageSource::User, false, 0);
        let second = row(MessageSource::User, false, 10);
        let first_id = first.id;
        assert_eq!(pick_next(&[second, first]).unwrap().id, first_id);
    }

    #[test]
    fn pick_none_when_everything_processed() {
        let msgs = vec![row(MessageSource::User, true, 0)];
        assert!(pick_next(&msgs).is_none());
    }

    #[test]
    fn history_excludes_other_unprocessed_messages() {
        let picked = row(MessageSource::User, false, 2);
        let msgs = vec![
            row(MessageSource::User, true, 0),
            row(MessageSource::User, false, 1), // unprocessed, not picked
            picked.clone(),
        ];
        let hist = input_history(&msgs, &picked, None);
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[1].id, picked.id);
    }

    #[test]
    fn history_starts_at_summary_anchor() {
        let picked = row(MessageSource::User, false, 3);
        let anchored = row(MessageSource::User, true, 2);
        let msgs = vec![
            row(MessageSource::User, true, 0),
            row(MessageSource::User, true, 1),
            anchored.clone(),
            picked.clone(),
        ];
        let summary = TaskSummaryRow {
            task_id: Uuid::new_v4(),
            message_anchor: anchored.id,
            content: Default::default(),
            token_budget: 512,
            create_time: Utc::now(),
        };
        let hist = input_history(&msgs, &picked, Some(&summary));
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].id, anchored.id);
    }
}
