// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Memory-form ↔ model-form message translation.
//!
//! Source mapping: assistant rows become assistant turns, user rows user
//! turns, system rows user turns carrying their tool-result blocks, and
//! task-source rows user turns prefixed with the sending child id so the
//! parent model sees attributed input.  Structurally impossible
//! combinations are typed errors — a message is never silently dropped.

use thiserror::Error;
use uuid::Uuid;

use foreman_model::{ModelBlock, ModelMessage, Role};
use foreman_store::{MessageBlock, MessageRow, MessageSource};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("message {message_id}: {row_source} message may not carry a {kind} block")]
    UnsupportedBlock {
        message_id: Uuid,
        row_source: &'static str,
        kind: &'static str,
    },
}

/// Convert stored rows into the model-exchange form, in order.
pub fn to_model_messages(rows: &[MessageRow]) -> Result<Vec<ModelMessage>, ConvertError> {
    rows.iter().map(to_model_message).collect()
}

fn to_model_message(row: &MessageRow) -> Result<ModelMessage, ConvertError> {
    let role = match row.source {
        MessageSource::Assistant => Role::Assistant,
        MessageSource::User | MessageSource::System | MessageSource::Task => Role::User,
    };

    let mut blocks = Vec::with_capacity(row.blocks.len());
    for block in &row.blocks {
        let converted = match (row.source, block) {
            (_, MessageBlock::Text { text }) => {
                let text = match (row.source, row.from_task_id) {
                    (MessageSource::Task, Some(from)) => {
                        format!("[from subtask {from}] {text}")
                    }
                    _ => text.clone(),
                };
                ModelBlock::Text { text }
            }
            (MessageSource::Assistant, MessageBlock::ToolCall { id, name, input }) => {
                ModelBlock::ToolCall { id: id.clone(), name: name.clone(), input: input.clone() }
            }
            (MessageSource::System, MessageBlock::ToolResult { id, name, output, succeeded }) => {
                ModelBlock::ToolResult {
                    id: id.clone(),
                    name: name.clone(),
                    output: output.clone(),
                    succeeded: *succeeded,
                }
            }
            (_, MessageBlock::ToolCall { .. }) => {
                return Err(ConvertError::UnsupportedBlock {
                    message_id: row.id,
                    row_source: row.source.as_str(),
                    kind: "tool_call",
                });
            }
            (_, MessageBlock::ToolResult { .. }) => {
                return Err(ConvertError::UnsupportedBlock {
                    message_id: row.id,
                    row_source: row.source.as_str(),
                    kind: "tool_result",
                });
            }
        };
        blocks.push(converted);
    }

    Ok(ModelMessage { role, blocks })
}

/// Convert a model response back into storable blocks.  Tool-call ids are
/// preserved verbatim so the following tool_result blocks pair up.
pub fn blocks_from_model(blocks: &[ModelBlock]) -> Vec<MessageBlock> {
    blocks
        .iter()
        .map(|b| match b {
            ModelBlock::Text { text } => MessageBlock::Text { text: text.clone() },
            ModelBlock::ToolCall { id, name, input } => MessageBlock::ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ModelBlock::ToolResult { id, name, output, succeeded } => MessageBlock::ToolResult {
                id: id.clone(),
                name: name.clone(),
                output: output.clone(),
                succeeded: *succeeded,
            },
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn row(source: MessageSource, blocks: Vec<MessageBlock>) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            source,
            blocks,
            usage: None,
            processed_time: None,
            from_task_id: None,
            create_time: Utc::now(),
        }
    }

    #[test]
    fn user_text_maps_to_user_role() {
        let rows = vec![row(MessageSource::User, vec![MessageBlock::text("hello")])];
        let out = to_model_messages(&rows).unwrap();
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].text(), "hello");
    }

    #[test]
    fn task_source_is_prefixed_with_sender() {
        let from = Uuid::new_v4();
        let mut r = row(MessageSource::Task, vec![MessageBlock::text("result ready")]);
        r.from_task_id = Some(from);
        let out = to_model_messages(&[r]).unwrap();
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].text(), format!("[from subtask {from}] result ready"));
    }

    #[test]
    fn tool_call_only_valid_on_assistant() {
        let call = MessageBlock::ToolCall {
            id: "tc".into(),
            name: "code_interpreter".into(),
            input: json!({}),
        };
        let ok = row(MessageSource::Assistant, vec![call.clone()]);
        assert!(to_model_messages(&[ok]).is_ok());

        let bad = row(MessageSource::User, vec![call]);
        let err = to_model_messages(&[bad]).unwrap_err();
        assert!(err.to_string().contains("tool_call"));
    }

    #[test]
    fn tool_result_only_valid_on_system() {
        let result = MessageBlock::ToolResult {
            id: "tc".into(),
            name: "code_interpreter".into(),
            output: json!({"console": ""}),
            succeeded: true,
        };
        let ok = row(MessageSource::System, vec![result.clone()]);
        assert!(to_model_messages(&[ok]).is_ok());

        let bad = row(MessageSource::Assistant, vec![result]);
        assert!(to_model_messages(&[bad]).is_err());
    }

    #[test]
    fn round_trip_preserves_ids() {
        let model_blocks = vec![
            ModelBlock::Text { text: "working".into() },
            ModelBlock::ToolCall {
                id: "toolu_99".into(),
                name: "code_interpreter".into(),
                input: json!({"script": "1"}),
            },
        ];
        let stored = blocks_from_model(&model_blocks);
        let back = to_model_messages(&[row(MessageSource::Assistant, stored)]).unwrap();
        assert_eq!(back[0].blocks, model_blocks);
    }
}
