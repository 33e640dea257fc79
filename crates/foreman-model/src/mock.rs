// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::ResponseStream;
use crate::{CompletionRequest, ResponseEvent};

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Total number of `complete()` calls served.
    pub calls: Arc<Mutex<usize>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts.  The outer `Vec`
    /// is the ordered list of calls; the inner `Vec` is the event sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Convenience: provider that always returns a single text reply with
    /// the given usage counters.
    pub fn always_text(reply: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage {
                input_tokens,
                output_tokens,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            },
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: a turn that calls `code_interpreter` with the given
    /// script, followed by a text turn.
    pub fn script_then_text(tool_id: impl Into<String>, script: &str, final_text: &str) -> Self {
        let args = serde_json::json!({ "script": script }).to_string();
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: "code_interpreter".into(),
                    arguments: args,
                },
                ResponseEvent::Usage {
                    input_tokens: 8,
                    output_tokens: 6,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                },
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.to_string()),
                ResponseEvent::Usage {
                    input_tokens: 9,
                    output_tokens: 3,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                },
                ResponseEvent::Done,
            ],
        ])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        *self.calls.lock().unwrap() += 1;
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![ResponseEvent::TextDelta("[no more scripts]".into()), ResponseEvent::Done]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{ModelMessage, ModelProvider};

    fn req() -> CompletionRequest {
        CompletionRequest {
            system: String::new(),
            messages: vec![ModelMessage::user("hi")],
            tools: vec![],
            max_tokens: 0,
        }
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedMockProvider::always_text("hello world", 3, 2);
        let mut stream = p.complete(req()).await.unwrap();
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hello world"));
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let p = ScriptedMockProvider::script_then_text("tc_1", "list_files('/tmp')", "done");

        let mut first = Vec::new();
        let mut stream = p.complete(req()).await.unwrap();
        while let Some(ev) = stream.next().await {
            first.push(ev.unwrap());
        }
        assert!(first
            .iter()
            .any(|e| matches!(e, ResponseEvent::ToolCall { name, .. } if name == "code_interpreter")));

        let mut second = Vec::new();
        let mut stream2 = p.complete(req()).await.unwrap();
        while let Some(ev) = stream2.next().await {
            second.push(ev.unwrap());
        }
        assert!(second.iter().any(|e| matches!(e, ResponseEvent::TextDelta(t) if t == "done")));
        assert_eq!(*p.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn fallback_when_scripts_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        let mut stream = p.complete(req()).await.unwrap();
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t.contains("no more scripts")));
    }

    #[tokio::test]
    async fn last_request_is_recorded() {
        let p = ScriptedMockProvider::always_text("x", 1, 1);
        let _ = p.complete(req()).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().messages.len(), 1);
    }
}
