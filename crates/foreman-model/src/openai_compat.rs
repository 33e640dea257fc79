// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::ResponseStream;
use crate::{CompletionRequest, ModelBlock, ModelMessage, ResponseEvent, Role};

/// Provider speaking the OpenAI chat-completions wire format.
///
/// Covers OpenAI itself plus the long tail of compatible servers (vLLM,
/// llama.cpp, LiteLLM, OpenRouter) — only the base URL differs.
pub struct OpenAiCompatProvider {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        model: String,
        api_key: String,
        base_url: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_openai_messages(&req.system, &req.messages);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        let max = if req.max_tokens > 0 { req.max_tokens } else { self.max_tokens };
        if max > 0 {
            body["max_tokens"] = json!(max);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, messages = req.messages.len(), "sending chat completion");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.name);
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => {
                        return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))]));
                    }
                };
                buf.push_str(&text);
                let mut events = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();
                        if data == "[DONE]" {
                            events.push(Ok(ResponseEvent::Done));
                        } else if let Ok(v) = serde_json::from_str::<Value>(data) {
                            events.extend(parse_openai_chunk(&v).into_iter().map(Ok));
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// One SSE chunk may carry a text delta, several tool-call deltas, and the
/// final usage object, so parsing returns a list.
fn parse_openai_chunk(v: &Value) -> Vec<ResponseEvent> {
    let mut events = Vec::new();

    if let Some(delta) = v["choices"].get(0).map(|c| &c["delta"]) {
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(ResponseEvent::TextDelta(text.to_string()));
            }
        }
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                events.push(ResponseEvent::ToolCall {
                    index: tc["index"].as_u64().unwrap_or(0) as u32,
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
                });
            }
        }
    }

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let details = &usage["prompt_tokens_details"];
        events.push(ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            cache_read_tokens: details["cached_tokens"].as_u64().unwrap_or(0),
            cache_write_tokens: 0,
        });
    }

    events
}

/// Convert shared-form messages into the chat-completions format.
///
/// Assistant tool calls become the `tool_calls` array; each tool result
/// becomes a separate role-`tool` message keyed by `tool_call_id`.
fn build_openai_messages(system: &str, messages: &[ModelMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(json!({ "role": "system", "content": system }));
    }
    for m in messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        let mut tool_results: Vec<Value> = Vec::new();
        for b in &m.blocks {
            match b {
                ModelBlock::Text { text } => text_parts.push(text),
                ModelBlock::ToolCall { id, name, input } => tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() },
                })),
                ModelBlock::ToolResult { id, output, .. } => tool_results.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": output.to_string(),
                })),
            }
        }

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            let mut msg = json!({ "role": role, "content": text_parts.join("\n") });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = json!(tool_calls);
            }
            out.push(msg);
        }
        out.extend(tool_results);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
