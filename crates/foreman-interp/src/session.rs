// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ScopedFs;

/// One recorded host-function invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionExecution {
    pub tool_name: String,
    /// JSON export of each call argument, in order.
    pub input: Vec<Value>,
    /// JSON export of the return value, or the error envelope on failure.
    pub output: Value,
    pub succeeded: bool,
}

/// Per-run state handed to every host function.
///
/// Holds the scoped filesystem, the captured console/user output streams,
/// the name of the tool currently executing, the recorded executions, and a
/// free-form key-value bag tools use to signal the engine (terminal
/// reports, handoffs).
pub struct Session {
    pub fs: ScopedFs,
    stdout: Mutex<String>,
    user_output: Mutex<String>,
    current_tool: Mutex<Option<String>>,
    executions: Mutex<Vec<FunctionExecution>>,
    bag: Mutex<HashMap<String, Value>>,
}

impl Session {
    pub fn new(fs: ScopedFs) -> Self {
        Self {
            fs,
            stdout: Mutex::new(String::new()),
            user_output: Mutex::new(String::new()),
            current_tool: Mutex::new(None),
            executions: Mutex::new(Vec::new()),
            bag: Mutex::new(HashMap::new()),
        }
    }

    pub fn write_stdout(&self, text: &str) {
        let mut out = self.stdout.lock().unwrap();
        out.push_str(text);
        out.push('\n');
    }

    pub fn write_user(&self, text: &str) {
        let mut out = self.user_output.lock().unwrap();
        out.push_str(text);
        out.push('\n');
    }

    pub fn console_output(&self) -> String {
        self.stdout.lock().unwrap().clone()
    }

    pub fn user_output(&self) -> String {
        self.user_output.lock().unwrap().clone()
    }

    pub fn set_current_tool(&self, name: Option<String>) {
        *self.current_tool.lock().unwrap() = name;
    }

    pub fn current_tool(&self) -> Option<String> {
        self.current_tool.lock().unwrap().clone()
    }

    pub fn record_execution(&self, exec: FunctionExecution) {
        self.executions.lock().unwrap().push(exec);
    }

    pub fn executions(&self) -> Vec<FunctionExecution> {
        self.executions.lock().unwrap().clone()
    }

    pub fn bag_set(&self, key: &str, value: Value) {
        self.bag.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn bag_get(&self, key: &str) -> Option<Value> {
        self.bag.lock().unwrap().get(key).cloned()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
