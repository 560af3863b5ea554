//! Configuration types for desk-workers.
//!
//! [`WorkerConfig`] is deserialized from the `[sections.workers]` table of
//! `.desk.toml` or the global config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker settings shared by every session.
///
/// All fields have defaults so a missing `[sections.workers]` table still
/// yields a usable configuration.
///
/// # Example `.desk.toml` section
///
/// ```toml
/// [sections.workers]
/// cli_bin = "/usr/local/bin/claude"
/// model = "claude-sonnet-4-5"
/// confirm_tools = ["Bash"]
/// history_dir = "/home/me/.local/share/agent-desk/history"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Assistant command-line executable (default: `"claude"` from the search path)
    #[serde(default = "default_cli_bin")]
    pub cli_bin: String,

    /// Model override (None = let the assistant pick its default)
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL for the network API variant
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// `anthropic-version` header sent by the network API variant
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Maximum output tokens per API request (default: `8192`)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tools that require explicit user approval over the SDK connection
    #[serde(default = "default_confirm_tools")]
    pub confirm_tools: Vec<String>,

    /// Seconds to wait for a confirmation before denying (default: `300`)
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Bounded wait for runtime version probes in milliseconds (default: `3000`)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Directory for JSON session history files (None = history is not persisted)
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
}

fn default_cli_bin() -> String {
    "claude".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_confirm_tools() -> Vec<String> {
    ["Bash", "Write", "Edit", "MultiEdit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_confirm_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cli_bin: default_cli_bin(),
            model: None,
            base_url: default_base_url(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            confirm_tools: default_confirm_tools(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            history_dir: None,
        }
    }
}
