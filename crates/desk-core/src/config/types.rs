//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default environment variable holding the assistant credential.
pub const DEFAULT_CREDENTIAL_ENV: &str = "ANTHROPIC_API_KEY";

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core configuration
    #[serde(default)]
    pub core: CoreConfig,
    /// Workspace access configuration
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Component-specific configuration sections: [sections.<name>]
    #[serde(default)]
    pub sections: HashMap<String, toml::Table>,
}

/// Which backend drives a session's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerVariant {
    /// Direct network API calls
    Api,
    /// One spawned command-line process per request
    Cli,
    /// Bidirectional streaming connection to the command-line tool
    Sdk,
}

impl WorkerVariant {
    /// Lowercase config name of the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerVariant::Api => "api",
            WorkerVariant::Cli => "cli",
            WorkerVariant::Sdk => "sdk",
        }
    }
}

impl fmt::Display for WorkerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(WorkerVariant::Api),
            "cli" => Ok(WorkerVariant::Cli),
            "sdk" => Ok(WorkerVariant::Sdk),
            other => Err(format!("unknown worker variant '{other}' (expected api, cli or sdk)")),
        }
    }
}

/// Core configuration
///
/// Fields are optional so that a config file only overrides what it sets;
/// use the accessor methods for effective values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Worker backend (default: `cli`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<WorkerVariant>,
    /// Environment variable carrying the credential (default: `ANTHROPIC_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
}

impl CoreConfig {
    /// Effective worker variant.
    pub fn variant(&self) -> WorkerVariant {
        self.variant.unwrap_or(WorkerVariant::Cli)
    }

    /// Effective credential environment variable name.
    pub fn credential_env(&self) -> &str {
        self.credential_env
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_CREDENTIAL_ENV)
    }
}

/// Folders and commands the assistant may touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Folders the assistant may work in. The first entry is the session
    /// working directory.
    #[serde(default)]
    pub authorized_folders: Vec<PathBuf>,
    /// Command prefixes the assistant must never run.
    #[serde(default)]
    pub blacklisted_commands: Vec<String>,
}

impl Config {
    /// Get a component's configuration section by name.
    /// Returns None if the component has no config section.
    pub fn section(&self, name: &str) -> Option<&toml::Table> {
        self.sections.get(name)
    }
}
