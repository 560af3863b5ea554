//! Config resolution for desk-workers.
//!
//! Resolves [`WorkerConfig`] from multiple sources with the following priority
//! (highest to lowest):
//!
//! 1. CLI flags (applied by the caller after [`resolve_config`] returns)
//! 2. Environment variables (`DESK_WORKERS_*`)
//! 3. Repo-local `.desk.toml` `[sections.workers]` table
//! 4. Global `~/.config/agent-desk/config.toml` `[sections.workers]` table
//! 5. Compiled-in defaults (via [`WorkerConfig::default`])

use super::types::WorkerConfig;
use crate::collaborators::MemoryConfigStore;
use agent_desk_core::config::{
    resolve_config as core_resolve, Config, ConfigOverrides, CoreConfig, WorkspaceConfig,
};
use agent_desk_core::home::get_home_dir;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Section name under `[sections.*]` holding worker settings.
pub const SECTION: &str = "workers";

/// Fully resolved configuration combining core settings with worker config.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Worker-specific configuration
    pub workers: WorkerConfig,
    /// Core configuration (variant, credential variable)
    pub core: CoreConfig,
    /// Authorized folders and blacklisted commands
    pub workspace: WorkspaceConfig,
}

impl ResolvedConfig {
    /// Build from an already-resolved core [`Config`], applying
    /// `DESK_WORKERS_*` environment overrides.
    pub fn from_core(config: Config) -> Self {
        let mut workers = match config.section(SECTION) {
            Some(table) => match toml::Value::Table(table.clone()).try_into::<WorkerConfig>() {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Invalid [sections.{SECTION}] table, using defaults: {e}");
                    WorkerConfig::default()
                }
            },
            None => WorkerConfig::default(),
        };

        apply_env_overrides(&mut workers);

        Self {
            workers,
            core: config.core,
            workspace: config.workspace,
        }
    }

    /// Credential read from the environment variable named by `credential_env`.
    pub fn credential(&self) -> Option<String> {
        std::env::var(self.core.credential_env())
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// Seed a [`MemoryConfigStore`] with the keys the worker factory reads.
    pub fn to_config_store(&self) -> MemoryConfigStore {
        let store = MemoryConfigStore::new();
        store.insert("variant", self.core.variant().as_str());
        store.insert("cli_bin", &self.workers.cli_bin);
        store.insert("base_url", &self.workers.base_url);
        if let Some(ref model) = self.workers.model {
            store.insert("model", model);
        }
        if let Some(key) = self.credential() {
            store.insert("api_key", &key);
        }
        store
    }
}

/// Resolve the complete configuration for desk-workers.
///
/// # Arguments
///
/// * `config_path` – Optional explicit path to a `.desk.toml`. When `None` the
///   function searches from the current working directory up to the git root.
/// * `working_dir` – Optional folder to put first in the authorized list.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or if an
/// explicit `config_path` cannot be read.
pub fn resolve_config(
    config_path: Option<&Path>,
    working_dir: Option<PathBuf>,
) -> anyhow::Result<ResolvedConfig> {
    let home_dir = get_home_dir()?;
    let current_dir = std::env::current_dir()?;

    let overrides = ConfigOverrides {
        config_path: config_path.map(Path::to_path_buf),
        working_dir,
        ..Default::default()
    };

    let core_config = core_resolve(&overrides, &current_dir, &home_dir)?;
    Ok(ResolvedConfig::from_core(core_config))
}

/// Apply `DESK_WORKERS_*` environment variable overrides to `cfg`.
///
/// Empty string values are treated as "not set" and do not override existing
/// configuration.
fn apply_env_overrides(cfg: &mut WorkerConfig) {
    if let Ok(v) = std::env::var("DESK_WORKERS_CLI_BIN") {
        if !v.is_empty() {
            cfg.cli_bin = v;
        }
    }
    if let Ok(v) = std::env::var("DESK_WORKERS_MODEL") {
        if !v.is_empty() {
            cfg.model = Some(v);
        }
    }
    if let Ok(v) = std::env::var("DESK_WORKERS_BASE_URL") {
        if !v.is_empty() {
            cfg.base_url = v;
        }
    }
    if let Ok(v) = std::env::var("DESK_WORKERS_CONFIRM_TIMEOUT_SECS") {
        if let Ok(secs) = v.parse::<u64>() {
            cfg.confirm_timeout_secs = secs;
        }
    }
    if let Ok(v) = std::env::var("DESK_WORKERS_PROBE_TIMEOUT_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            cfg.probe_timeout_ms = ms;
        }
    }
    if let Ok(v) = std::env::var("DESK_WORKERS_HISTORY_DIR") {
        if !v.is_empty() {
            cfg.history_dir = Some(PathBuf::from(v));
        }
    }
}
