// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use foreman_interp::{HostTool, Session, ToolError, ToolErrorCode};

use crate::args::{option_str, option_u64, required_str};
use crate::truncate::{truncate_output, OutputCategory};

pub struct ExecuteCommandTool {
    pub timeout_secs: u64,
    pub char_cap: usize,
}

#[async_trait]
impl HostTool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory and return \
         {stdout, stderr, exit_code}. Options: {timeout_secs, cwd}."
    }

    fn signature(&self) -> String {
        "execute_command(command, {timeout_secs?, cwd?})".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Shell command line" },
                { "type": "object", "properties": {
                    "timeout_secs": { "type": "integer" },
                    "cwd": { "type": "string", "description": "Working directory (absolute)" }
                }}
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let command = required_str(args, 0, "command")?;
        let timeout = option_u64(args, 1, "timeout_secs").unwrap_or(self.timeout_secs);
        let cwd = match option_str(args, 1, "cwd") {
            Some(dir) => session.fs.resolve(dir)?,
            None => session.fs.root().to_path_buf(),
        };

        debug!(command = %command, cwd = %cwd.display(), timeout, "execute_command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout), child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(ToolError::internal(format!("spawn failed: {e}")));
            }
            Err(_) => {
                return Err(ToolError::new(
                    ToolErrorCode::Unavailable,
                    format!("command timed out after {timeout}s"),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(json!({
            "stdout": truncate_output(OutputCategory::HeadTail, &stdout, self.char_cap),
            "stderr": truncate_output(OutputCategory::HeadTail, &stderr, self.char_cap / 4),
            "exit_code": output.status.code().unwrap_or(-1),
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
