// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/keel/config.yaml"));
    paths.push(PathBuf::from("/etc/keel/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/keel/config.yaml"));
        paths.push(home.join(".config/keel/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("keel/config.yaml"));
        paths.push(cfg.join("keel/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".keel/config.yaml"));
    paths.push(PathBuf::from(".keel/config.yml"));
    paths.push(PathBuf::from(".keel.yaml"));
    paths.push(PathBuf::from(".keel.yml"));
    paths.push(PathBuf::from("keel.yaml"));
    paths.push(PathBuf::from("keel.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
///
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI
/// flag); the `APP_CONFIG_PATH` environment variable is honoured between the
/// search path and the explicit flag.  The result is range-normalized.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_file(&mut merged, &path)?;
        }
    }

    if let Ok(env_path) = std::env::var("APP_CONFIG_PATH") {
        let expanded = shellexpand::tilde(&env_path).to_string();
        let p = PathBuf::from(expanded);
        if p.is_file() {
            debug!(path = %p.display(), "loading APP_CONFIG_PATH config");
            merge_file(&mut merged, &p)?;
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_file(&mut merged, p)?;
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config.normalized())
}

fn merge_file(dst: &mut serde_yaml::Value, path: &Path) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let layer: serde_yaml::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    merge_yaml(dst, layer);
    Ok(())
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Data directory resolution ────────────────────────────────────────────────

/// Base data directory: `DATA_DIR` env override or `~/.keel`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DATA_DIR") {
        return PathBuf::from(shellexpand::tilde(&dir).to_string());
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".keel")
}

/// Snapshot object storage directory: `SNAPSHOT_DIR` env override or
/// `<data_dir>/snapshots`.
pub fn snapshot_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SNAPSHOT_DIR") {
        return PathBuf::from(shellexpand::tilde(&dir).to_string());
    }
    data_dir().join("snapshots")
}

/// Embedded database path: `DB_PATH` env override or `<data_dir>/keel.db`.
pub fn db_path() -> PathBuf {
    if let Ok(p) = std::env::var("DB_PATH") {
        return PathBuf::from(shellexpand::tilde(&p).to_string());
    }
    data_dir().join("keel.db")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("shell:\n  timeout_sec: 30\n  max_output: 100");
        let src = val("shell:\n  timeout_sec: 5");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["shell"]["timeout_sec"].as_i64(), Some(5));
        assert_eq!(dst["shell"]["max_output"].as_i64(), Some(100));
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "llm:\n  timeout_sec: 42\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.llm.timeout_sec, 42.0);
    }

    #[test]
    fn load_missing_everything_yields_defaults() {
        // No explicit path; search paths may or may not exist on the host, so
        // only assert that loading succeeds and yields a usable config.
        let cfg = load(None).unwrap();
        assert!(cfg.agent.react_max_iterations >= 1);
    }

    #[test]
    fn load_normalizes_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "agent:\n  react_max_iterations: 9999\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.agent.react_max_iterations, 200);
    }

    #[test]
    fn db_path_defaults_under_data_dir() {
        // Only valid when the env overrides are unset in the test environment.
        if std::env::var("DB_PATH").is_err() && std::env::var("DATA_DIR").is_err() {
            let p = db_path();
            assert!(p.ends_with(".keel/keel.db") || p.to_string_lossy().contains(".keel"));
        }
    }
}
