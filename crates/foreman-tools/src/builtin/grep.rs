// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use foreman_interp::{HostTool, Session, ToolError};

use crate::args::{optional_str, required_str};
use crate::truncate::{truncate_output, OutputCategory};

const MAX_MATCHES: usize = 200;
/// Files larger than this are skipped rather than scanned.
const MAX_FILE_BYTES: u64 = 2_000_000;

pub struct GrepTool {
    pub char_cap: usize,
}

#[async_trait]
impl HostTool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Searches the given \
         file, or recursively under the given directory (default: project \
         root). Returns 'path:line: text' matches, capped at 200."
    }

    fn signature(&self) -> String {
        "grep(pattern, path?)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Regular expression" },
                { "type": "string", "description": "File or directory to search" }
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let pattern = required_str(args, 0, "pattern")?;
        let re = Regex::new(pattern)
            .map_err(|e| ToolError::invalid(format!("invalid pattern: {e}")))?;
        let path = optional_str(args, 1).unwrap_or("/");
        let real = session.fs.resolve(path)?;
        let fs = session.fs.clone();
        let cap = self.char_cap;

        let result = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            let walker = WalkDir::new(&real).follow_links(false);
            'files: for entry in walker.into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(entry.path()) else {
                    continue; // binary or unreadable
                };
                let shown = fs.virtualize(entry.path());
                for (i, line) in text.lines().enumerate() {
                    if re.is_match(line) {
                        lines.push(format!("{shown}:{}: {}", i + 1, line.trim_end()));
                        if lines.len() >= MAX_MATCHES {
                            break 'files;
                        }
                    }
                }
            }
            lines
        })
        .await
        .map_err(|e| ToolError::internal(format!("grep task failed: {e}")))?;

        if result.is_empty() {
            return Ok(Value::String("no matches".into()));
        }
        Ok(Value::String(truncate_output(
            OutputCategory::MatchList,
            &result.join("\n"),
            cap,
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_interp::ScopedFs;

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\nneedle here\nthree\n").unwrap();
        let sess = Session::new(ScopedFs::new(dir.path()));
        let out = GrepTool { char_cap: 10_000 }
            .call(&sess, &[json!("needle")])
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(text.contains("/a.txt:2: needle here"), "got: {text}");
    }

    #[tokio::test]
    async fn no_matches_reports_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing\n").unwrap();
        let sess = Session::new(ScopedFs::new(dir.path()));
        let out = GrepTool { char_cap: 10_000 }
            .call(&sess, &[json!("absent_term")])
            .await
            .unwrap();
        assert_eq!(out.as_str().unwrap(), "no matches");
    }

    #[tokio::test]
    async fn invalid_regex_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let sess = Session::new(ScopedFs::new(dir.path()));
        let err = GrepTool { char_cap: 10_000 }
            .call(&sess, &[json!("([")])
            .await
            .unwrap_err();
        assert_eq!(err.code, foreman_interp::ToolErrorCode::InvalidArgument);
    }
}
