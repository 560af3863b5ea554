//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables
//! 3. Repo-local config (.desk.toml)
//! 4. Global config (~/.config/agent-desk/config.toml)
//! 5. Defaults

mod discovery;
mod types;

pub use discovery::{resolve_config, ConfigError, ConfigOverrides, REPO_CONFIG_FILE};
pub use types::{
    Config, CoreConfig, WorkerVariant, WorkspaceConfig, DEFAULT_CREDENTIAL_ENV,
};
