// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::json;

use foreman_model::ToolDecl;
use foreman_store::SummaryContent;

/// Assemble the system prompt: agent instructions, the generated
/// host-function catalog, and (after compaction) the conversation summary.
pub fn system_prompt(
    instructions: &str,
    catalog: &str,
    summary: Option<&SummaryContent>,
) -> String {
    let mut out = String::with_capacity(instructions.len() + catalog.len() + 256);
    out.push_str(instructions.trim());
    out.push_str("\n\n");
    out.push_str(catalog.trim());
    if let Some(s) = summary {
        out.push_str("\n\n# Conversation summary\n");
        out.push_str(&render_summary(s));
    }
    out
}

/// The single tool the model sees, regardless of how many host functions
/// the interpreter registers internally.
pub fn code_interpreter_decl() -> ToolDecl {
    ToolDecl {
        name: "code_interpreter".into(),
        description: "Execute a JavaScript program in the task sandbox. The \
                      available functions are listed in the system prompt; \
                      call them with await. Use console.log for anything you \
                      want reported back."
            .into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "script": {
                    "type": "string",
                    "description": "JavaScript source to execute"
                }
            },
            "required": ["script"],
            "additionalProperties": false
        }),
    }
}

/// The instruction appended to the summarized prefix when compaction
/// replays it to the model.
pub fn summary_request() -> String {
    "Summarize the conversation above as a single JSON object with exactly \
     these fields: session_intent (string), play_by_play (array of strings), \
     artifact_trail (array of strings), decisions (array of strings), \
     breadcrumbs (array of strings), pending_tasks (array of strings). \
     Output only the JSON object, no prose and no code fences."
        .to_string()
}

/// Parse the model's summary reply, tolerating code fences.
pub fn parse_summary(text: &str) -> Option<SummaryContent> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

fn render_summary(s: &SummaryContent) -> String {
    let mut out = String::new();
    out.push_str(&format!("Intent: {}\n", s.session_intent));
    for (label, items) in [
        ("Play by play", &s.play_by_play),
        ("Artifacts", &s.artifact_trail),
        ("Decisions", &s.decisions),
        ("Breadcrumbs", &s.breadcrumbs),
        ("Pending", &s.pending_tasks),
    ] {
        if !items.is_empty() {
            out.push_str(&format!("{label}:\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
