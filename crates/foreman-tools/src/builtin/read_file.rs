// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use foreman_interp::{HostTool, Session, ToolError};

use crate::args::{option_u64, required_str};
use crate::truncate::{truncate_output, OutputCategory};

/// Default number of lines returned when the caller does not specify a
/// limit.  Kept small to avoid flooding the model context on the first
/// read; the script can paginate with offset + limit.
const DEFAULT_LINE_LIMIT: usize = 200;

pub struct ReadFileTool {
    pub char_cap: usize,
}

#[async_trait]
impl HostTool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Returns lines formatted as L{n}:content (1-indexed), \
         default 200 lines; pass {offset, limit} to paginate. A pagination \
         notice shows the next offset when more lines exist."
    }

    fn signature(&self) -> String {
        "read_file(path, {offset?, limit?})".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Absolute file path" },
                { "type": "object", "properties": {
                    "offset": { "type": "integer", "description": "1-indexed start line" },
                    "limit": { "type": "integer", "description": "Maximum lines" }
                }}
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let path = required_str(args, 0, "path")?;
        let offset = option_u64(args, 1, "offset").unwrap_or(1).max(1) as usize;
        let limit = option_u64(args, 1, "limit").unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;
        let real = session.fs.resolve(path)?;

        debug!(path = %real.display(), offset, limit, "read_file");

        let text = tokio::fs::read_to_string(&real)
            .await
            .map_err(|e| ToolError::not_found(format!("read error: {e}")))?;

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset - 1;
        let selected: Vec<String> = all_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, line)| format!("L{}:{}", i + 1, line))
            .collect();

        let last_shown = start + selected.len();
        let mut content = selected.join("\n");
        if last_shown < total {
            content.push_str(&format!(
                "\n...[{} more lines — showing L{}-L{} of {}; use offset={} to continue]",
                total - last_shown,
                offset,
                offset + selected.len().saturating_sub(1),
                total,
                last_shown + 1
            ));
        }

        Ok(Value::String(truncate_output(
            OutputCategory::FileContent,
            &content,
            self.char_cap,
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
