// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// A named agent configuration: system instructions plus a model binding.
#[derive(Debug, Clone)]
pub struct AgentRow {
    pub id: Uuid,
    pub name: String,
    pub instructions: String,
    pub model_id: Uuid,
    pub compaction_enabled: bool,
    /// Policy hook: when set, an assistant turn without tool calls and
    /// without a terminal report still re-enqueues the task.
    pub continue_without_tools: bool,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// A concrete model under a provider, with its context window and
/// per-million-token unit prices.
#[derive(Debug, Clone)]
pub struct ModelRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub context_window: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Anthropic,
    Openai,
    OpenaiCompat,
    Mock,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::OpenaiCompat => "openai_compat",
            Self::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::Openai),
            "openai_compat" => Ok(Self::OpenaiCompat),
            "mock" => Ok(Self::Mock),
            other => Err(StoreError::Invalid {
                field: "provider_type",
                reason: format!("unknown value: {other}"),
            }),
        }
    }
}

/// A model provider account.  `secret` is AES-256-GCM ciphertext
/// (12-byte nonce prepended); the raw credential never touches disk.
#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: Uuid,
    pub provider_type: ProviderType,
    pub base_url: Option<String>,
    pub secret: Vec<u8>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Unspecified,
    Awaiting,
    Running,
    Suspended,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Awaiting => "awaiting",
            Self::Running => "running",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "awaiting" => Ok(Self::Awaiting),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            other => Err(StoreError::Invalid {
                field: "phase",
                reason: format!("unknown value: {other}"),
            }),
        }
    }
}

/// A conversation/execution thread owned by one agent.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub parent_task_id: Option<Uuid>,
    pub phase: TaskPhase,
    pub desired_phase: TaskPhase,
    pub project_directory: Option<String>,
    /// Hard stop for the compaction anchor walk: the walk never crosses
    /// this message, regardless of token arithmetic.
    pub anchor_message_id: Option<Uuid>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_write_tokens: i64,
    pub cache_read_tokens: i64,
    pub total_cost: f64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    User,
    Assistant,
    System,
    Task,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "task" => Ok(Self::Task),
            other => Err(StoreError::Invalid {
                field: "source",
                reason: format!("unknown value: {other}"),
            }),
        }
    }

    /// Pick priority for the step loop: lower sorts first.
    pub fn pick_rank(&self) -> u8 {
        match self {
            Self::System => 0,
            Self::User => 1,
            Self::Task => 2,
            Self::Assistant => 3,
        }
    }
}

/// One block of message content.  The discriminator is explicit — payloads
/// are decoded via `kind`, never by structural sniffing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBlock {
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

impl MessageBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// Token counters reported by a provider for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }

    /// Cost of this turn under the given model's unit prices (per 1M tokens).
    pub fn cost(&self, model: &ModelRow) -> f64 {
        (self.input_tokens as f64 * model.input_cost
            + self.output_tokens as f64 * model.output_cost
            + self.cache_write_tokens as f64 * model.cache_write_cost
            + self.cache_read_tokens as f64 * model.cache_read_cost)
            / 1_000_000.0
    }
}

/// A persisted message: an ordered list of blocks plus step bookkeeping.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub source: MessageSource,
    pub blocks: Vec<MessageBlock>,
    pub usage: Option<Usage>,
    /// Set once the reconciler has consumed this message; the sole marker
    /// that advances the per-task state machine.
    pub processed_time: Option<DateTime<Utc>>,
    /// The sending child task when `source == Task`.
    pub from_task_id: Option<Uuid>,
    pub create_time: DateTime<Utc>,
}

impl MessageRow {
    pub fn is_processed(&self) -> bool {
        self.processed_time.is_some()
    }

    /// Concatenated text blocks; tool blocks are skipped.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                MessageBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<&MessageBlock> {
        self.blocks.iter().filter(|b| b.is_tool_call()).collect()
    }

    /// Approximate context footprint: the provider-reported total when the
    /// message carries usage, a chars/4 estimate otherwise.
    pub fn approx_tokens(&self) -> u64 {
        if let Some(u) = &self.usage {
            return u.total();
        }
        let chars: usize = self
            .blocks
            .iter()
            .map(|b| match b {
                MessageBlock::Text { text } => text.len(),
                MessageBlock::ToolCall { name, input, .. } => {
                    name.len() + input.to_string().len()
                }
                MessageBlock::ToolResult { name, output, .. } => {
                    name.len() + output.to_string().len()
                }
            })
            .sum();
        ((chars / 4).max(1)) as u64
    }
}

/// The structured summary produced by compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryContent {
    #[serde(default)]
    pub session_intent: String,
    #[serde(default)]
    pub play_by_play: Vec<String>,
    #[serde(default)]
    pub artifact_trail: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
}

/// At most one per task; replaced wholesale on re-compaction.
#[derive(Debug, Clone)]
pub struct TaskSummaryRow {
    pub task_id: Uuid,
    /// Earliest retained message: everything strictly before it is covered
    /// by the summary.
    pub message_anchor: Uuid,
    pub content: SummaryContent,
    pub token_budget: u32,
    pub create_time: DateTime<Utc>,
}

/// An API access credential, stored by hash only.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: Uuid,
    pub name: String,
    pub hash: String,
    pub token_type: String,
    pub expire_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

impl TokenRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.is_some_and(|t| t <= now)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
