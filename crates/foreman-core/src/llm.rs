// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use futures::StreamExt;
use tracing::warn;

use foreman_model::{ModelBlock, ResponseEvent, ResponseStream};
use foreman_store::Usage;

/// The assembled result of one streamed model turn.
#[derive(Debug, Clone)]
pub struct CollectedResponse {
    /// Text first (when present), then tool calls ordered by stream index.
    pub blocks: Vec<ModelBlock>,
    pub usage: Usage,
}

struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Always resolve to a JSON object.  Providers require tool inputs to
    /// be objects; an unparseable buffer degrades to `{}` with a warning
    /// rather than poisoning the conversation history.
    fn finish(self, fallback_ordinal: usize) -> ModelBlock {
        let input = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        error = %e,
                        "model sent invalid JSON tool arguments; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        let id = if self.id.is_empty() {
            // An empty id would break result pairing downstream; synthesize
            // a stable fallback.
            format!("tc_synthetic_{fallback_ordinal}")
        } else {
            self.id
        };
        ModelBlock::ToolCall { id, name: self.name, input }
    }
}

/// Drain a provider stream into the final assistant blocks plus usage.
///
/// `on_delta` is called once per non-empty text delta with an ordered chunk
/// index — the hook the reconciler uses to publish `message.chunk` events.
pub async fn collect_response(
    mut stream: ResponseStream,
    mut on_delta: impl FnMut(usize, &str),
) -> anyhow::Result<CollectedResponse> {
    let mut text = String::new();
    let mut chunk_index = 0usize;
    let mut usage = Usage::default();
    // Keyed by the provider's parallel-tool-call index; OpenAI interleaves
    // chunks for different calls, other providers always use one index per
    // call.
    let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                on_delta(chunk_index, &delta);
                chunk_index += 1;
                text.push_str(&delta);
            }
            ResponseEvent::TextDelta(_) => {}
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                let ptc = pending.entry(index).or_insert_with(|| PendingToolCall {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if !id.is_empty() {
                    ptc.id = id;
                }
                if !name.is_empty() {
                    ptc.name = name;
                }
                ptc.args_buf.push_str(&arguments);
            }
            ResponseEvent::Usage {
                input_tokens,
                output_tokens,
                cache_write_tokens,
                cache_read_tokens,
            } => {
                usage.input_tokens += input_tokens;
                usage.output_tokens += output_tokens;
                usage.cache_write_tokens += cache_write_tokens;
                usage.cache_read_tokens += cache_read_tokens;
            }
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => {
                warn!("model stream error: {e}");
            }
        }
    }

    let mut blocks = Vec::new();
    if !text.is_empty() {
        blocks.push(ModelBlock::Text { text });
    }
    let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
    sorted.sort_by_key(|(idx, _)| *idx);
    for (ordinal, (_, ptc)) in sorted.into_iter().enumerate() {
        if ptc.name.is_empty() {
            warn!("dropping tool call with empty name from model; cannot dispatch");
            continue;
        }
        blocks.push(ptc.finish(ordinal));
    }

    Ok(CollectedResponse { blocks, usage })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn to_stream(events: Vec<ResponseEvent>) -> ResponseStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn text_deltas_accumulate_and_chunks_are_ordered() {
        let s = to_stream(vec![
            ResponseEvent::TextDelta("hel".into()),
            ResponseEvent::TextDelta("lo".into()),
            ResponseEvent::Done,
        ]);
        let mut chunks = Vec::new();
        let out = collect_response(s, |i, d| chunks.push((i, d.to_string()))).await.unwrap();
        assert_eq!(out.blocks, vec![ModelBlock::Text { text: "hello".into() }]);
        assert_eq!(chunks, vec![(0, "hel".into()), (1, "lo".into())]);
    }

    #[tokio::test]
    async fn split_tool_call_arguments_are_joined() {
        let s = to_stream(vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "tc_1".into(),
                name: "code_interpreter".into(),
                arguments: "{\"script\":".into(),
            },
            ResponseEvent::ToolCall {
                index: 0,
                id: "".into(),
                name: "".into(),
                arguments: "\"1+1\"}".into(),
            },
            ResponseEvent::Done,
        ]);
        let out = collect_response(s, |_, _| {}).await.unwrap();
        match &out.blocks[0] {
            ModelBlock::ToolCall { id, input, .. } => {
                assert_eq!(id, "tc_1");
                assert_eq!(input["script"], "1+1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_calls_sorted_by_index() {
        let s = to_stream(vec![
            ResponseEvent::ToolCall {
                index: 1,
                id: "b".into(),
                name: "code_interpreter".into(),
                arguments: "{}".into(),
            },
            ResponseEvent::ToolCall {
                index: 0,
                id: "a".into(),
                name: "code_interpreter".into(),
                arguments: "{}".into(),
            },
            ResponseEvent::Done,
        ]);
        let out = collect_response(s, |_, _| {}).await.unwrap();
        let ids: Vec<_> = out
            .blocks
            .iter()
            .map(|b| match b {
                ModelBlock::ToolCall { id, .. } => id.clone(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn usage_events_accumulate() {
        let s = to_stream(vec![
            ResponseEvent::Usage {
                input_tokens: 3,
                output_tokens: 0,
                cache_write_tokens: 1,
                cache_read_tokens: 0,
            },
            ResponseEvent::Usage {
                input_tokens: 0,
                output_tokens: 2,
                cache_write_tokens: 0,
                cache_read_tokens: 0,
            },
            ResponseEvent::Done,
        ]);
        let out = collect_response(s, |_, _| {}).await.unwrap();
        assert_eq!(out.usage.input_tokens, 3);
        assert_eq!(out.usage.output_tokens, 2);
        assert_eq!(out.usage.cache_write_tokens, 1);
    }

    #[tokio::test]
    async fn invalid_arguments_degrade_to_empty_object() {
        let s = to_stream(vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "tc".into(),
                name: "code_interpreter".into(),
                arguments: "{not json".into(),
            },
            ResponseEvent::Done,
        ]);
        let out = collect_response(s, |_, _| {}).await.unwrap();
        match &out.blocks[0] {
            ModelBlock::ToolCall { input, .. } => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nameless_tool_call_is_dropped() {
        let s = to_stream(vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "tc".into(),
                name: "".into(),
                arguments: "{}".into(),
            },
            ResponseEvent::Done,
        ]);
        let out = collect_response(s, |_, _| {}).await.unwrap();
        assert!(out.blocks.is_empty());
    }
}
