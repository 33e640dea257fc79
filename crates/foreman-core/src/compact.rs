// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context-budget monitoring and anchor selection.
//!
//! Compaction runs between steps: when the previous assistant turn reports
//! more total tokens than the trigger threshold, the older part of the
//! conversation is replayed to the model for a structured summary, and the
//! summary row replaces any prior one.  A failure leaves the task
//! un-truncated for that step — compaction is an optimization, never a
//! correctness requirement.

use tracing::{debug, warn};
use uuid::Uuid;

use foreman_config::CompactionConfig;
use foreman_model::{CompletionRequest, ModelMessage, ModelProvider};
use foreman_store::{MessageBlock, MessageRow, ModelRow, Store, TaskRow};

use crate::llm::collect_response;
use crate::{convert, prompts, Error};

/// Where to cut: messages `[0..cut_index)` are summarized, the suffix is
/// retained verbatim, and `anchor` is the earliest retained message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    pub cut_index: usize,
    pub anchor: Uuid,
    pub retained_tokens: u64,
}

/// True when the previous assistant turn reported more tokens than the
/// trigger threshold.
pub fn should_compact(messages: &[MessageRow], trigger_tokens: u64) -> bool {
    messages
        .iter()
        .rev()
        .find_map(|m| m.usage.as_ref())
        .map(|u| u.total() > trigger_tokens)
        .unwrap_or(false)
}

/// Select the truncation point.
///
/// Walk from the newest message toward the oldest, summing reported
/// totals; the cut is the earliest index whose retained suffix still fits
/// `retained_budget`.  An explicit anchor is a hard stop — the walk never
/// extends the retained tail past it.  The cut is then pulled back so the
/// retained tail never begins with an orphaned tool-result message.
pub fn plan_compaction(
    messages: &[MessageRow],
    retained_budget: u64,
    hard_anchor: Option<Uuid>,
) -> Option<CompactionPlan> {
    if messages.len() < 2 {
        return None;
    }

    let mut retained = 0u64;
    let mut cut = messages.len();
    for i in (0..messages.len()).rev() {
        let t = messages[i].approx_tokens();
        if retained + t > retained_budget {
            break;
        }
        retained += t;
        cut = i;
    }
    // Always retain at least the newest message.
    cut = cut.min(messages.len() - 1);

    if let Some(anchor) = hard_anchor {
        if let Some(idx) = messages.iter().position(|m| m.id == anchor) {
            cut = cut.max(idx);
        }
    }

    // Never split a tool-call/tool-result pair: a retained tail starting
    // with a tool-result message references a call that was summarized
    // away, which providers reject.
    while cut > 0 && starts_with_tool_result(&messages[cut]) {
        cut -= 1;
    }

    if cut == 0 {
        return None;
    }
    Some(CompactionPlan {
        cut_index: cut,
        anchor: messages[cut].id,
        retained_tokens: messages[cut..].iter().map(|m| m.approx_tokens()).sum(),
    })
}

fn starts_with_tool_result(msg: &MessageRow) -> bool {
    matches!(msg.blocks.first(), Some(MessageBlock::ToolResult { .. }))
}

/// Run one compaction pass: plan, summarize the prefix, replace the
/// summary row and move the task anchor.  Returns `false` when there is
/// nothing to compact.
pub async fn run_compaction(
    store: &Store,
    provider: &dyn ModelProvider,
    task: &TaskRow,
    model: &ModelRow,
    cfg: &CompactionConfig,
    messages: &[MessageRow],
) -> crate::Result<bool> {
    let retained_budget =
        (model.context_window as f64 * cfg.retained_fraction as f64) as u64;
    let Some(plan) = plan_compaction(messages, retained_budget, task.anchor_message_id) else {
        return Ok(false);
    };

    debug!(
        task_id = %task.id,
        cut = plan.cut_index,
        retained_tokens = plan.retained_tokens,
        "compacting"
    );

    // Replay the prefix (plus any previous summary) with the structured
    // summary request; no tools, so the model focuses on summarizing.
    let previous = store.get_task_summary(task.id)?;
    let mut model_msgs: Vec<ModelMessage> =
        convert::to_model_messages(&messages[..plan.cut_index])?;
    model_msgs.push(ModelMessage::user(prompts::summary_request()));

    let system = match previous {
        Some(prev) => prompts::system_prompt(
            "You summarize agent work sessions.",
            "",
            Some(&prev.content),
        ),
        None => "You summarize agent work sessions.".to_string(),
    };

    let req = CompletionRequest {
        system,
        messages: model_msgs,
        tools: vec![],
        max_tokens: cfg.summary_budget,
    };
    let stream = provider
        .complete(req)
        .await
        .map_err(|e| Error::Transient(format!("summary call failed: {e}")))?;
    let collected = collect_response(stream, |_, _| {})
        .await
        .map_err(|e| Error::Transient(format!("summary stream failed: {e}")))?;

    let text: String = collected
        .blocks
        .iter()
        .filter_map(|b| match b {
            foreman_model::ModelBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    let Some(content) = prompts::parse_summary(&text) else {
        warn!(task_id = %task.id, "summary reply was not valid JSON; skipping compaction");
        return Err(Error::Transient("unparseable summary reply".into()));
    };

    store.replace_summary(task.id, plan.anchor, &content, cfg.summary_budget)?;
    store.set_anchor_message(task.id, Some(plan.anchor))?;
    Ok(true)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
