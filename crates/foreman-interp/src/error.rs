// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification carried into the VM alongside the
/// message, so scripts (and the model reading their failures) can branch on
/// the kind of failure rather than parsing prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    NotFound,
    InvalidArgument,
    PermissionDenied,
    Unavailable,
    Cancelled,
    Internal,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::PermissionDenied => "permission_denied",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

/// An error surfaced inside the interpreter.  Rendered as a thrown JS error
/// carrying `{code, message, suggestions}`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{}: {message}", code.as_str())]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), suggestions: Vec::new() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::NotFound, message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::PermissionDenied, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::Internal, message)
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// Failures of the interpreter itself, as opposed to script-level errors
/// (which are returned in the outcome, not as `Err`).
#[derive(Debug, Error)]
pub enum InterpError {
    #[error("interpreter: vm setup failed: {0}")]
    Vm(String),
}

impl From<rquickjs::Error> for InterpError {
    fn from(e: rquickjs::Error) -> Self {
        Self::Vm(e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_serializes_code_and_suggestions() {
        let e = ToolError::not_found("no agent named 'reviwer'")
            .with_suggestions(vec!["reviewer".into(), "researcher".into()]);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["suggestions"][0], "reviewer");
    }

    #[test]
    fn empty_suggestions_are_omitted() {
        let e = ToolError::invalid("missing path");
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("suggestions"));
    }

    #[test]
    fn display_includes_code() {
        let e = ToolError::denied("path escapes project directory");
        assert!(e.to_string().starts_with("permission_denied:"));
    }
}
