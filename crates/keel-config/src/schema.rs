// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Clamp all numeric options into their documented ranges.
    ///
    /// Out-of-range values from hand-edited config files are corrected rather
    /// than rejected, so a bad edit degrades to the nearest sane setting
    /// instead of refusing to boot the server.
    pub fn normalized(mut self) -> Self {
        self.llm.timeout_sec = self.llm.timeout_sec.clamp(1.0, 3600.0);
        self.context.compress_start_pct = self.context.compress_start_pct.clamp(1, 100);
        self.context.compress_target_pct = self
            .context
            .compress_target_pct
            .clamp(1, self.context.compress_start_pct.saturating_sub(1).max(1));
        self.context.min_keep_messages = self.context.min_keep_messages.max(1);
        self.context.step_calls = self
            .context
            .step_calls
            .clamp(1, self.context.keep_recent_calls.max(1));
        // head + tail must leave room for the omission marker.
        if self.context.long_data_head_chars + self.context.long_data_tail_chars
            > self.context.long_data_threshold
        {
            self.context.long_data_head_chars = self.context.long_data_threshold * 3 / 10;
            self.context.long_data_tail_chars = self.context.long_data_threshold / 5;
        }
        self.agent.react_max_iterations = self.agent.react_max_iterations.clamp(1, 200);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Per-model-call deadline in seconds (1–3600)
    #[serde(default = "default_llm_timeout")]
    pub timeout_sec: f64,
    /// Retry policy applied to 5xx responses only
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_llm_timeout() -> f64 {
    180.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_sec: default_llm_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_sec: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_sec: f64,
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    8.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_sec: default_base_delay(),
            max_delay_sec: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Master switch for summary-based compression
    #[serde(default)]
    pub compression_enabled: bool,
    /// Estimated-token percentage of the window at which compression starts
    #[serde(default = "default_compress_start_pct")]
    pub compress_start_pct: u32,
    /// Target percentage after compression (hysteresis; must be < start)
    #[serde(default = "default_compress_target_pct")]
    pub compress_target_pct: u32,
    /// Floor on the number of uncompressed dialogue messages
    #[serde(default = "default_min_keep_messages")]
    pub min_keep_messages: usize,
    /// Protected window: the most recent model calls never compressed
    #[serde(default = "default_keep_recent_calls")]
    pub keep_recent_calls: usize,
    /// How many calls the protected window shrinks by per retry
    #[serde(default = "default_step_calls")]
    pub step_calls: usize,
    /// Middle-truncate large tool arguments and outputs in rebuilt history
    #[serde(default = "default_true")]
    pub truncate_long_data: bool,
    #[serde(default = "default_long_data_threshold")]
    pub long_data_threshold: usize,
    #[serde(default = "default_long_data_head")]
    pub long_data_head_chars: usize,
    #[serde(default = "default_long_data_tail")]
    pub long_data_tail_chars: usize,
}

fn default_compress_start_pct() -> u32 {
    75
}
fn default_compress_target_pct() -> u32 {
    55
}
fn default_min_keep_messages() -> usize {
    12
}
fn default_keep_recent_calls() -> usize {
    10
}
fn default_step_calls() -> usize {
    5
}
fn default_long_data_threshold() -> usize {
    4000
}
fn default_long_data_head() -> usize {
    1200
}
fn default_long_data_tail() -> usize {
    800
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compression_enabled: false,
            compress_start_pct: default_compress_start_pct(),
            compress_target_pct: default_compress_target_pct(),
            min_keep_messages: default_min_keep_messages(),
            keep_recent_calls: default_keep_recent_calls(),
            step_calls: default_step_calls(),
            truncate_long_data: true,
            long_data_threshold: default_long_data_threshold(),
            long_data_head_chars: default_long_data_head(),
            long_data_tail_chars: default_long_data_tail(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base system prompt prepended to every turn
    #[serde(default = "default_base_system_prompt")]
    pub base_system_prompt: String,
    /// Loop bound for the reason-act-observe cycle (1–200)
    #[serde(default = "default_react_max_iterations")]
    pub react_max_iterations: u32,
}

fn default_base_system_prompt() -> String {
    "You are a helpful AI assistant.".into()
}
fn default_react_max_iterations() -> u32 {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_system_prompt: default_base_system_prompt(),
            react_max_iterations: default_react_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Command basenames that run without a permission request in default mode
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,
    /// Timeout for a single shell command
    #[serde(default = "default_shell_timeout")]
    pub timeout_sec: f64,
    /// Maximum captured output characters before truncation
    #[serde(default = "default_shell_max_output")]
    pub max_output: usize,
    /// How long a blocked command waits for an approval decision
    #[serde(default = "default_permission_timeout")]
    pub permission_timeout_sec: f64,
}

fn default_allowlist() -> Vec<String> {
    ["npm", "npx", "pnpm", "yarn", "node", "python", "pip", "git", "rg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_shell_timeout() -> f64 {
    30.0
}
fn default_shell_max_output() -> usize {
    20_000
}
fn default_permission_timeout() -> f64 {
    300.0
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allowlist: default_allowlist(),
            timeout_sec: default_shell_timeout(),
            max_output: default_shell_max_output(),
            permission_timeout_sec: default_permission_timeout(),
        }
    }
}

impl ShellConfig {
    /// Case-insensitive allowlist membership test.
    pub fn allows(&self, basename: &str) -> bool {
        let lower = basename.to_lowercase();
        self.allowlist.iter().any(|a| a.to_lowercase() == lower)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Default cap on bytes returned by a single file read
    #[serde(default = "default_files_max_bytes")]
    pub max_bytes: usize,
}

fn default_files_max_bytes() -> usize {
    20_000
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_files_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Tavily API key; falls back to the TAVILY_API_KEY env var when empty
    #[serde(default)]
    pub tavily_api_key: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    /// Results scoring below this are dropped
    #[serde(default = "default_search_min_score")]
    pub min_score: f64,
}

fn default_search_max_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "basic".into()
}
fn default_search_min_score() -> f64 {
    0.4
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: String::new(),
            max_results: default_search_max_results(),
            search_depth: default_search_depth(),
            min_score: default_search_min_score(),
        }
    }
}

/// Policy profile selecting which tool gates apply to an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// All gates active: allowlist, operators, path containment
    Default,
    /// Reads may leave the work path; commands keep the path-escape gate
    ShellSafe,
    /// No gates
    Super,
}

impl Default for AgentMode {
    fn default() -> Self {
        AgentMode::Default
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Default => write!(f, "default"),
            AgentMode::ShellSafe => write!(f, "shell_safe"),
            AgentMode::Super => write!(f, "super"),
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "" => Ok(AgentMode::Default),
            "shell_safe" | "shell-safe" => Ok(AgentMode::ShellSafe),
            "super" => Ok(AgentMode::Super),
            other => anyhow::bail!("unknown agent mode: {other:?}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn config_default_llm_timeout_is_180() {
        let c = Config::default();
        assert_eq!(c.llm.timeout_sec, 180.0);
    }

    #[test]
    fn config_default_retry_policy() {
        let c = Config::default();
        assert_eq!(c.llm.retry.max_retries, 5);
        assert_eq!(c.llm.retry.base_delay_sec, 1.0);
        assert_eq!(c.llm.retry.max_delay_sec, 8.0);
    }

    #[test]
    fn config_default_compression_disabled() {
        let c = Config::default();
        assert!(!c.context.compression_enabled);
    }

    #[test]
    fn config_default_truncation_enabled_with_headroom() {
        let c = Config::default();
        assert!(c.context.truncate_long_data);
        assert!(
            c.context.long_data_head_chars + c.context.long_data_tail_chars
                <= c.context.long_data_threshold
        );
    }

    #[test]
    fn config_default_shell_allowlist_has_git() {
        let c = Config::default();
        assert!(c.shell.allows("git"));
        assert!(c.shell.allows("GIT"), "membership must be case-insensitive");
        assert!(!c.shell.allows("rm"));
    }

    #[test]
    fn config_default_react_iterations_in_range() {
        let c = Config::default();
        assert!(c.agent.react_max_iterations >= 1);
        assert!(c.agent.react_max_iterations <= 200);
    }

    // ── Normalization ────────────────────────────────────────────────────────

    #[test]
    fn normalized_clamps_llm_timeout() {
        let mut c = Config::default();
        c.llm.timeout_sec = 99999.0;
        assert_eq!(c.normalized().llm.timeout_sec, 3600.0);
        let mut c = Config::default();
        c.llm.timeout_sec = 0.0;
        assert_eq!(c.normalized().llm.timeout_sec, 1.0);
    }

    #[test]
    fn normalized_forces_target_below_start() {
        let mut c = Config::default();
        c.context.compress_start_pct = 60;
        c.context.compress_target_pct = 90;
        let n = c.normalized();
        assert!(n.context.compress_target_pct < n.context.compress_start_pct);
    }

    #[test]
    fn normalized_bounds_step_calls_by_keep_recent() {
        let mut c = Config::default();
        c.context.keep_recent_calls = 3;
        c.context.step_calls = 10;
        let n = c.normalized();
        assert_eq!(n.context.step_calls, 3);
    }

    #[test]
    fn normalized_repairs_truncation_headroom() {
        let mut c = Config::default();
        c.context.long_data_threshold = 100;
        c.context.long_data_head_chars = 90;
        c.context.long_data_tail_chars = 90;
        let n = c.normalized();
        assert!(
            n.context.long_data_head_chars + n.context.long_data_tail_chars
                <= n.context.long_data_threshold
        );
    }

    #[test]
    fn normalized_clamps_react_iterations() {
        let mut c = Config::default();
        c.agent.react_max_iterations = 0;
        assert_eq!(c.clone().normalized().agent.react_max_iterations, 1);
        c.agent.react_max_iterations = 1000;
        assert_eq!(c.normalized().agent.react_max_iterations, 200);
    }

    // ── AgentMode ────────────────────────────────────────────────────────────

    #[test]
    fn agent_mode_display_round_trip() {
        for mode in [AgentMode::Default, AgentMode::ShellSafe, AgentMode::Super] {
            let parsed: AgentMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn agent_mode_parse_accepts_hyphenated_shell_safe() {
        let m: AgentMode = "shell-safe".parse().unwrap();
        assert_eq!(m, AgentMode::ShellSafe);
    }

    #[test]
    fn agent_mode_parse_rejects_unknown() {
        assert!("root".parse::<AgentMode>().is_err());
    }

    // ── YAML round-trip ──────────────────────────────────────────────────────

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml = "context:\n  compression_enabled: true\n  compress_start_pct: 80\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(c.context.compression_enabled);
        assert_eq!(c.context.compress_start_pct, 80);
        assert_eq!(c.context.compress_target_pct, 55, "serde default fills gap");
        assert_eq!(c.llm.timeout_sec, 180.0);
    }

    #[test]
    fn config_yaml_round_trip_preserves_allowlist() {
        let mut c = Config::default();
        c.shell.allowlist = vec!["ls".into(), "cargo".into()];
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.shell.allowlist, vec!["ls", "cargo"]);
    }

    #[test]
    fn shell_config_yaml_overrides_timeouts() {
        let yaml = "shell:\n  timeout_sec: 5\n  permission_timeout_sec: 10\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.shell.timeout_sec, 5.0);
        assert_eq!(c.shell.permission_timeout_sec, 10.0);
        assert_eq!(c.shell.max_output, 20_000, "unset field keeps default");
    }
}
