//! Canonical home directory resolution for agent-desk.
//!
//! Every crate in the workspace resolves the home directory through
//! [`get_home_dir`] so that tests and custom deployments can redirect all
//! file access with a single `DESK_HOME` variable.
//!
//! # Precedence
//!
//! 1. `DESK_HOME` environment variable (if set and non-empty after trimming)
//! 2. `dirs::home_dir()` platform default
//!
//! # Testing
//!
//! Tests that touch configuration or session files MUST point `DESK_HOME` at
//! a temporary directory:
//!
//! ```ignore
//! let temp_dir = tempfile::TempDir::new().unwrap();
//! unsafe { std::env::set_var("DESK_HOME", temp_dir.path()) };
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Relative location of agent-desk files under the home directory.
pub const CONFIG_SUBDIR: &str = ".config/agent-desk";

/// Get the home directory for agent-desk operations.
///
/// # Errors
///
/// Returns an error when `DESK_HOME` is unset and the platform home directory
/// cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("DESK_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Directory holding global agent-desk configuration and state.
pub fn config_dir(home: &Path) -> PathBuf {
    home.join(CONFIG_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn with_desk_home<F: FnOnce()>(value: Option<&str>, f: F) {
        let original = env::var("DESK_HOME").ok();
        unsafe {
            match value {
                Some(v) => env::set_var("DESK_HOME", v),
                None => env::remove_var("DESK_HOME"),
            }
        }
        f();
        unsafe {
            match original {
                Some(v) => env::set_var("DESK_HOME", v),
                None => env::remove_var("DESK_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_desk_home_set() {
        with_desk_home(Some("/custom/home"), || {
            assert_eq!(get_home_dir().unwrap(), PathBuf::from("/custom/home"));
        });
    }

    #[test]
    #[serial]
    fn test_desk_home_trims_whitespace() {
        with_desk_home(Some("  /custom/home  "), || {
            assert_eq!(get_home_dir().unwrap(), PathBuf::from("/custom/home"));
        });
    }

    #[test]
    #[serial]
    fn test_blank_desk_home_uses_platform_default() {
        with_desk_home(Some("   "), || {
            assert_eq!(get_home_dir().unwrap(), dirs::home_dir().unwrap());
        });
    }

    #[test]
    #[serial]
    fn test_unset_desk_home_uses_platform_default() {
        with_desk_home(None, || {
            assert_eq!(get_home_dir().unwrap(), dirs::home_dir().unwrap());
        });
    }

    #[test]
    fn test_config_dir_layout() {
        let dir = config_dir(Path::new("/home/u"));
        assert_eq!(dir, PathBuf::from("/home/u/.config/agent-desk"));
    }
}
