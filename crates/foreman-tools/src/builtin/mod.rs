// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod execute_command;
mod fetch;
mod files;
mod grep;
mod read_file;
mod report;

pub use execute_command::ExecuteCommandTool;
pub use fetch::FetchTool;
pub use files::{CreateFileTool, EditFileTool, FindFileTool, ListFilesTool};
pub use grep::GrepTool;
pub use read_file::ReadFileTool;
pub use report::{AskUserTool, HandoffTool, SubmitReportTool, HANDOFF_REASON_KEY, QUESTION_KEY, REPORT_KEY, TERMINAL_KEY};
