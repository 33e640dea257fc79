// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    5
}

fn default_grace_secs() -> u64 {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_trigger_fraction() -> f32 {
    0.8
}

fn default_retained_fraction() -> f32 {
    0.5
}

fn default_summary_budget() -> u32 {
    2048
}

fn default_result_char_cap() -> usize {
    40_000
}

fn default_command_timeout() -> u64 {
    120
}

fn default_await_timeout() -> u64 {
    300
}

fn default_secret_key_env() -> String {
    "FOREMAN_SECRET_KEY".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub subtask: SubtaskConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Path to the SQLite database file.  Relative paths are resolved against
    /// the working directory; `~` is expanded.
    #[serde(default)]
    pub database: Option<String>,
}

impl Config {
    /// Database path with `~` expansion applied, or the default location.
    pub fn database_path(&self) -> String {
        let raw = self.database.as_deref().unwrap_or("~/.local/share/foreman/foreman.db");
        shellexpand::tilde(raw).into_owned()
    }
}

/// Settings for the work queue and worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Number of concurrent workers draining the task queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds granted to in-flight steps after shutdown is requested.
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Capacity of the event-bus delivery queue.  Publishes beyond this are
    /// counted as dropped rather than blocking the reconciler.
    #[serde(default = "default_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_grace_secs: default_grace_secs(),
            event_queue_capacity: default_queue_capacity(),
        }
    }
}

/// Context-window compaction policy.
///
/// Both fractions are resolved against the model's `context_window` at step
/// time: compaction triggers when the previous assistant turn reported more
/// than `trigger_fraction × context_window` total tokens, and the retained
/// tail is cut to at most `retained_fraction × context_window`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_trigger_fraction")]
    pub trigger_fraction: f32,
    #[serde(default = "default_retained_fraction")]
    pub retained_fraction: f32,
    /// Maximum tokens requested for the summary itself.
    #[serde(default = "default_summary_budget")]
    pub summary_budget: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            trigger_fraction: default_trigger_fraction(),
            retained_fraction: default_retained_fraction(),
            summary_budget: default_summary_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Character cap applied to a single host-function result before it is
    /// recorded; oversized output is truncated by category.
    #[serde(default = "default_result_char_cap")]
    pub result_char_cap: usize,
    /// Default timeout for `execute_command` invocations.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Allow the `fetch` host function to reach the network.
    #[serde(default = "default_true")]
    pub allow_network: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            result_char_cap: default_result_char_cap(),
            command_timeout_secs: default_command_timeout(),
            allow_network: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskConfig {
    /// Default timeout for `await_tasks`, in seconds.
    #[serde(default = "default_await_timeout")]
    pub await_timeout_secs: u64,
}

impl Default for SubtaskConfig {
    fn default() -> Self {
        Self { await_timeout_secs: default_await_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Environment variable holding the 32-byte (hex) key used to encrypt
    /// provider credentials at rest.
    #[serde(default = "default_secret_key_env")]
    pub key_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { key_env: default_secret_key_env() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.reconciler.workers, 5);
        assert_eq!(c.reconciler.shutdown_grace_secs, 8);
        assert!((c.compaction.trigger_fraction - 0.8).abs() < f32::EPSILON);
        assert!((c.compaction.retained_fraction - 0.5).abs() < f32::EPSILON);
        assert_eq!(c.subtask.await_timeout_secs, 300);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.reconciler.workers, 5);
        assert!(c.interpreter.allow_network);
    }

    #[test]
    fn partial_yaml_overrides_single_field() {
        let c: Config = serde_yaml::from_str("reconciler:\n  workers: 2\n").unwrap();
        assert_eq!(c.reconciler.workers, 2);
        // Untouched siblings keep their defaults.
        assert_eq!(c.reconciler.shutdown_grace_secs, 8);
    }

    #[test]
    fn database_path_expands_tilde() {
        let c = Config { database: Some("~/x/foreman.db".into()), ..Default::default() };
        assert!(!c.database_path().starts_with('~'));
        assert!(c.database_path().ends_with("x/foreman.db"));
    }
}
