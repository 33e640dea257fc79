// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Host functions exposed to interpreter scripts.
//!
//! Each tool is a [`foreman_interp::HostTool`]; the set a task gets is
//! assembled by [`standard_toolset`].  Filesystem tools resolve every path
//! through the session's scoped view, so a task can never name anything
//! outside its project directory.

mod args;
mod builtin;
mod catalog;
mod truncate;

pub use builtin::{
    AskUserTool, CreateFileTool, EditFileTool, ExecuteCommandTool, FetchTool, FindFileTool,
    GrepTool, HandoffTool, ListFilesTool, ReadFileTool, SubmitReportTool, HANDOFF_REASON_KEY,
    QUESTION_KEY, REPORT_KEY, TERMINAL_KEY,
};
pub use catalog::render_catalog;
pub use truncate::{truncate_output, OutputCategory};

use foreman_interp::ToolSet;

/// Behavioural knobs threaded into individual tools.
#[derive(Debug, Clone)]
pub struct ToolOptions {
    /// Character cap applied to a single tool result.
    pub result_char_cap: usize,
    /// Default timeout for `execute_command`.
    pub command_timeout_secs: u64,
    /// Allow `fetch` to reach the network.
    pub allow_network: bool,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self { result_char_cap: 40_000, command_timeout_secs: 120, allow_network: true }
    }
}

/// The standard host-function set: filesystem, search, system, web and
/// report tools.  Subtask tools are registered separately by the engine —
/// they need the store and the work queue.
pub fn standard_toolset(opts: &ToolOptions) -> ToolSet {
    let mut set = ToolSet::new();
    set.register(ReadFileTool { char_cap: opts.result_char_cap });
    set.register(CreateFileTool);
    set.register(EditFileTool);
    set.register(ListFilesTool);
    set.register(FindFileTool);
    set.register(GrepTool { char_cap: opts.result_char_cap });
    set.register(ExecuteCommandTool {
        timeout_secs: opts.command_timeout_secs,
        char_cap: opts.result_char_cap,
    });
    set.register(FetchTool {
        enabled: opts.allow_network,
        char_cap: opts.result_char_cap,
    });
    set.register(SubmitReportTool);
    set.register(AskUserTool);
    set.register(HandoffTool);
    set
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
