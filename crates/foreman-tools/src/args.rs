// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Positional-argument extraction shared by the builtin tools.
//!
//! Scripts call host functions with ordinary JS arguments; by the time a
//! tool sees them they are a JSON array.  Missing required arguments are
//! `invalid_argument` errors that name the parameter, so the model can
//! correct the call.

use foreman_interp::ToolError;
use serde_json::Value;

pub fn required_str<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, ToolError> {
    args.get(idx)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid(format!("missing required argument '{name}' (string)")))
}

pub fn optional_str<'a>(args: &'a [Value], idx: usize) -> Option<&'a str> {
    args.get(idx).and_then(|v| v.as_str())
}

/// Read a field out of an options object passed at `idx`.
pub fn option_u64(args: &[Value], idx: usize, field: &str) -> Option<u64> {
    args.get(idx).and_then(|v| v.get(field)).and_then(|v| v.as_u64())
}

pub fn option_str<'a>(args: &'a [Value], idx: usize, field: &str) -> Option<&'a str> {
    args.get(idx).and_then(|v| v.get(field)).and_then(|v| v.as_str())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
