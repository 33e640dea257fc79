// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::bail;

use crate::{AnthropicProvider, ModelProvider, OpenAiCompatProvider};

/// Build a provider from a stored provider row's fields.
///
/// `provider_type` matches the persisted enum string; `api_key` is the
/// already-decrypted credential.  The `mock` type is rejected here — tests
/// construct [`crate::ScriptedMockProvider`] directly, it has no place in a
/// configured deployment.
pub fn build_provider(
    provider_type: &str,
    model_name: &str,
    api_key: String,
    base_url: Option<String>,
    max_tokens: u32,
) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match provider_type {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            model_name.to_string(),
            api_key,
            base_url,
            max_tokens,
        ))),
        "openai" => Ok(Arc::new(OpenAiCompatProvider::new(
            "openai",
            model_name.to_string(),
            api_key,
            base_url,
            max_tokens,
        ))),
        "openai_compat" => {
            let Some(url) = base_url else {
                bail!("openai_compat provider requires a base_url");
            };
            Ok(Arc::new(OpenAiCompatProvider::new(
                "openai_compat",
                model_name.to_string(),
                api_key,
                Some(url),
                max_tokens,
            )))
        }
        other => bail!("unknown provider type: {other}"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_known_provider_types() {
        let p = build_provider("anthropic", "claude-x", "key".into(), None, 4096).unwrap();
        assert_eq!(p.name(), "anthropic");
        let p = build_provider("openai", "gpt-x", "key".into(), None, 4096).unwrap();
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn compat_requires_base_url() {
        assert!(build_provider("openai_compat", "m", "k".into(), None, 0).is_err());
        assert!(build_provider(
            "openai_compat",
            "m",
            "k".into(),
            Some("http://localhost:8000/v1".into()),
            0
        )
        .is_ok());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(build_provider("carrier-pigeon", "m", "k".into(), None, 0).is_err());
    }
}
