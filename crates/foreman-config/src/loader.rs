// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/foreman/config.yaml"));
    paths.push(PathBuf::from("/etc/foreman/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/foreman/config.yaml"));
        paths.push(home.join(".config/foreman/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("foreman/config.yaml"));
        paths.push(cfg.join("foreman/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".foreman/config.yaml"));
    paths.push(PathBuf::from(".foreman/config.yml"));
    paths.push(PathBuf::from(".foreman.yaml"));
    paths.push(PathBuf::from(".foreman.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (d, s) => *d = s,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_scalars() {
        let mut a: serde_yaml::Value =
            serde_yaml::from_str("reconciler:\n  workers: 5\n").unwrap();
        let b: serde_yaml::Value = serde_yaml::from_str("reconciler:\n  workers: 9\n").unwrap();
        merge_yaml(&mut a, b);
        let c: Config = serde_yaml::from_value(a).unwrap();
        assert_eq!(c.reconciler.workers, 9);
    }

    #[test]
    fn merge_preserves_sibling_keys() {
        let mut a: serde_yaml::Value =
            serde_yaml::from_str("compaction:\n  trigger_fraction: 0.7\n").unwrap();
        let b: serde_yaml::Value =
            serde_yaml::from_str("compaction:\n  summary_budget: 512\n").unwrap();
        merge_yaml(&mut a, b);
        let c: Config = serde_yaml::from_value(a).unwrap();
        assert!((c.compaction.trigger_fraction - 0.7).abs() < f32::EPSILON);
        assert_eq!(c.compaction.summary_budget, 512);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "reconciler:\n  workers: 3\n").unwrap();
        let c = load(Some(&path)).unwrap();
        assert_eq!(c.reconciler.workers, 3);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/foreman.yaml")));
        assert!(err.is_err());
    }
}
