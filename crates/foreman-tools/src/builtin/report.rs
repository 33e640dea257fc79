// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use foreman_interp::{HostTool, Session, ToolError};

use crate::args::{optional_str, required_str};

/// Bag key the engine inspects to decide whether the turn is terminal.
pub const TERMINAL_KEY: &str = "terminal";
pub const REPORT_KEY: &str = "report";
pub const QUESTION_KEY: &str = "question";
pub const HANDOFF_REASON_KEY: &str = "handoff_reason";

pub struct SubmitReportTool;

#[async_trait]
impl HostTool for SubmitReportTool {
    fn name(&self) -> &str {
        "submit_report"
    }

    fn description(&self) -> &str {
        "Submit the final report for this task. Call exactly once, when the \
         task is complete; the task stops afterwards."
    }

    fn signature(&self) -> String {
        "submit_report(report)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [ { "type": "string", "description": "Final report text" } ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let report = required_str(args, 0, "report")?;
        session.bag_set(REPORT_KEY, Value::String(report.to_string()));
        session.bag_set(TERMINAL_KEY, Value::String("submit_report".into()));
        Ok(json!({ "submitted": true }))
    }
}

pub struct AskUserTool;

#[async_trait]
impl HostTool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question. The question is delivered out-of-band; \
         the answer arrives as a later user message."
    }

    fn signature(&self) -> String {
        "ask_user(question)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [ { "type": "string", "description": "Question text" } ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let question = required_str(args, 0, "question")?;
        session.write_user(question);
        session.bag_set(QUESTION_KEY, Value::String(question.to_string()));
        Ok(json!({ "asked": true }))
    }
}

pub struct HandoffTool;

#[async_trait]
impl HostTool for HandoffTool {
    fn name(&self) -> &str {
        "handoff"
    }

    fn description(&self) -> &str {
        "Hand the task off: stop working and leave a note about what \
         remains. Use when the task cannot proceed without outside help."
    }

    fn signature(&self) -> String {
        "handoff(reason?)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [ { "type": "string", "description": "What remains and why" } ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let reason = optional_str(args, 0).unwrap_or("unspecified");
        session.bag_set(TERMINAL_KEY, Value::String("handoff".into()));
        session.bag_set(HANDOFF_REASON_KEY, Value::String(reason.to_string()));
        Ok(json!({ "handoff": true }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
