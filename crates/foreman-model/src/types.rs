use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One content block of a model-exchange message.
///
/// Tool calls and results are typed; providers serialize them into their
/// API-specific shapes (`tool_use`/`tool_result` for Anthropic,
/// `tool_calls`/role-`tool` turns for OpenAI-compatible APIs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
        succeeded: bool,
    },
}

/// A single message in the model-exchange form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub blocks: Vec<ModelBlock>,
}

impl ModelMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, blocks: vec![ModelBlock::Text { text: text.into() }] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, blocks: vec![ModelBlock::Text { text: text.into() }] }
    }

    /// The concatenated text blocks of this message.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ModelBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, ModelBlock::ToolCall { .. }))
    }
}

/// A tool declaration passed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object.
    pub input_schema: serde_json::Value,
}

/// Request sent to a model provider.  Providers always stream.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt, separated out because Anthropic wants it top-level.
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDecl>,
    pub max_tokens: u32,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model.
    TextDelta(String),
    /// The model wants to call a tool.  Arguments may arrive across multiple
    /// events for the same `index`; `id` and `name` are set on the first.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Token counters.  May be reported in more than one event per turn
    /// (Anthropic splits input and output counts); consumers accumulate.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
        cache_write_tokens: u64,
        cache_read_tokens: u64,
    },
    /// The stream finished normally.
    Done,
    /// A recoverable stream error (non-fatal warning).
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_single_text_block() {
        let m = ModelMessage::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
        assert!(!m.has_tool_calls());
    }

    #[test]
    fn has_tool_calls_detects_block() {
        let m = ModelMessage {
            role: Role::Assistant,
            blocks: vec![
                ModelBlock::Text { text: "thinking...".into() },
                ModelBlock::ToolCall {
                    id: "tc_1".into(),
                    name: "code_interpreter".into(),
                    input: serde_json::json!({"script": "1+1"}),
                },
            ],
        };
        assert!(m.has_tool_calls());
        assert_eq!(m.text(), "thinking...");
    }

    #[test]
    fn block_serializes_with_type_tag() {
        let b = ModelBlock::ToolResult {
            id: "tc_1".into(),
            name: "code_interpreter".into(),
            output: serde_json::json!({"console": "ok"}),
            succeeded: true,
        };
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"type\":\"tool_result\""));
    }
}
