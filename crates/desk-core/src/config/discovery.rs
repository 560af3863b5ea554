//! Configuration discovery and resolution

use super::types::{Config, WorkerVariant};
use crate::home::config_dir;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Repo-local config file name.
pub const REPO_CONFIG_FILE: &str = ".desk.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Invalid value in an environment variable
    #[error("invalid value for {var}: {message}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// What was wrong with it
        message: String,
    },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override worker variant
    pub variant: Option<WorkerVariant>,
    /// Prepend an authorized folder (becomes the working directory)
    pub working_dir: Option<PathBuf>,
    /// Path to config file override; replaces the repo-local search
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Repo-local config (`.desk.toml` in current dir or up to git root),
///    or the explicit `config_path` override
/// 4. Global config (`~/.config/agent-desk/config.toml`)
/// 5. Defaults
///
/// # Errors
///
/// Returns an error when an explicit `config_path` cannot be read or parsed,
/// or when an environment override holds an invalid value. Unparsable
/// discovered files are skipped with a warning.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    // 4. Try global config
    let global_config_path = config_dir(home_dir).join("config.toml");
    if global_config_path.exists() {
        match load_config_file(&global_config_path) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse global config at {global_config_path:?}: {e}"),
        }
    }

    // 3. Explicit file, or repo-local config
    if let Some(ref path) = overrides.config_path {
        merge_config(&mut config, load_config_file(path)?);
    } else if let Some(repo_config) = find_repo_local_config(current_dir) {
        match load_config_file(&repo_config) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse repo config at {repo_config:?}: {e}"),
        }
    }

    // 2. Apply environment variables
    apply_env_overrides(&mut config)?;

    // 1. Apply command-line overrides
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Find repo-local config file
///
/// Searches current directory and parent directories up to git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(REPO_CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

/// Load config from a TOML file
fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Merge file config into base config; only values the file sets win.
fn merge_config(base: &mut Config, file: Config) {
    if file.core.variant.is_some() {
        base.core.variant = file.core.variant;
    }
    if file.core.credential_env.is_some() {
        base.core.credential_env = file.core.credential_env;
    }

    if !file.workspace.authorized_folders.is_empty() {
        base.workspace.authorized_folders = file.workspace.authorized_folders;
    }
    if !file.workspace.blacklisted_commands.is_empty() {
        base.workspace.blacklisted_commands = file.workspace.blacklisted_commands;
    }

    for (name, table) in file.sections {
        base.sections.insert(name, table);
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("DESK_VARIANT") {
        if !v.trim().is_empty() {
            let variant = v
                .parse::<WorkerVariant>()
                .map_err(|message| ConfigError::InvalidEnv {
                    var: "DESK_VARIANT",
                    message,
                })?;
            config.core.variant = Some(variant);
        }
    }

    if let Ok(v) = std::env::var("DESK_CREDENTIAL_ENV") {
        if !v.trim().is_empty() {
            config.core.credential_env = Some(v);
        }
    }

    if let Some(raw) = std::env::var_os("DESK_AUTHORIZED_FOLDERS") {
        if !raw.is_empty() {
            config.workspace.authorized_folders = std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
    }

    Ok(())
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(variant) = overrides.variant {
        config.core.variant = Some(variant);
    }

    if let Some(ref dir) = overrides.working_dir {
        config.workspace.authorized_folders.retain(|p| p != dir);
        config.workspace.authorized_folders.insert(0, dir.clone());
    }
}
