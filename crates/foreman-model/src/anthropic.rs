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

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: String,
        base_url: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_anthropic_messages(&req.messages);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": if req.max_tokens > 0 { req.max_tokens } else { self.max_tokens },
            "stream": true,
        });
        if !req.system.is_empty() {
            body["system"] = json!(req.system);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, messages = req.messages.len(), "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward.  Only complete lines (terminated by '\n') are
        // parsed; anything left over is prepended to the next chunk.
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
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            events.push(Ok(parse_anthropic_event(&v)));
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

fn parse_anthropic_event(v: &Value) -> ResponseEvent {
    let event_type = v["type"].as_str().unwrap_or("");
    match event_type {
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    ResponseEvent::TextDelta(delta["text"].as_str().unwrap_or("").to_string())
                }
                "input_json_delta" => ResponseEvent::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                },
                _ => ResponseEvent::TextDelta(String::new()),
            }
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                ResponseEvent::ToolCall {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }
            } else {
                ResponseEvent::TextDelta(String::new())
            }
        }
        "message_start" => {
            // Anthropic reports input and cache counters only here.
            if let Some(usage) = v["message"].get("usage") {
                return ResponseEvent::Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                    output_tokens: 0,
                    cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
                    cache_write_tokens: usage["cache_creation_input_tokens"]
                        .as_u64()
                        .unwrap_or(0),
                };
            }
            ResponseEvent::TextDelta(String::new())
        }
        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                return ResponseEvent::Usage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                };
            }
            ResponseEvent::TextDelta(String::new())
        }
        "message_stop" => ResponseEvent::Done,
        "error" => ResponseEvent::Error(
            v["error"]["message"].as_str().unwrap_or("unknown stream error").to_string(),
        ),
        _ => ResponseEvent::TextDelta(String::new()),
    }
}

/// Convert shared-form messages into the Anthropic wire format.
///
/// Tool results become `tool_result` content blocks inside a user turn;
/// tool calls become `tool_use` blocks inside an assistant turn.  Provider
/// ids are forwarded verbatim so the pairing survives the round trip.
fn build_anthropic_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content: Vec<Value> = m
            .blocks
            .iter()
            .map(|b| match b {
                ModelBlock::Text { text } => json!({ "type": "text", "text": text }),
                ModelBlock::ToolCall { id, name, input } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                }),
                ModelBlock::ToolResult { id, output, succeeded, .. } => json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": output.to_string(),
                    "is_error": !succeeded,
                }),
            })
            .collect();
        out.push(json!({ "role": role, "content": content }));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
