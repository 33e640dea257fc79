// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use foreman_interp::{HostTool, Session, ToolError, ToolErrorCode};

use crate::args::required_str;
use crate::truncate::{truncate_output, OutputCategory};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Rendering width for HTML → text conversion.
const RENDER_WIDTH: usize = 100;

pub struct FetchTool {
    pub enabled: bool,
    pub char_cap: usize,
}

#[async_trait]
impl HostTool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a http(s) URL and return its body. HTML is rendered to \
         plain text; other content is returned as-is (truncated)."
    }

    fn signature(&self) -> String {
        "fetch(url)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [ { "type": "string", "description": "http(s) URL" } ]
        })
    }

    async fn call(&self, _session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let url = required_str(args, 0, "url")?;
        if !self.enabled {
            return Err(ToolError::new(
                ToolErrorCode::PermissionDenied,
                "network access is disabled for this task",
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::invalid("only http(s) URLs are supported"));
        }

        debug!(url = %url, "fetch");

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ToolError::internal(format!("client: {e}")))?;
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::new(ToolErrorCode::Unavailable, format!("fetch failed: {e}")))?;

        let status = resp.status().as_u16();
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::new(ToolErrorCode::Unavailable, format!("body: {e}")))?;

        let text = if is_html {
            html2text::from_read(body.as_bytes(), RENDER_WIDTH)
        } else {
            body
        };

        Ok(json!({
            "status": status,
            "body": truncate_output(OutputCategory::Generic, &text, self.char_cap),
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_interp::ScopedFs;

    #[tokio::test]
    async fn disabled_network_is_denied() {
        let sess = Session::new(ScopedFs::unscoped());
        let t = FetchTool { enabled: false, char_cap: 1000 };
        let err = t.call(&sess, &[json!("https://example.com")]).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let sess = Session::new(ScopedFs::unscoped());
        let t = FetchTool { enabled: true, char_cap: 1000 };
        let err = t.call(&sess, &[json!("file:///etc/passwd")]).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidArgument);
    }
}
