//! Narrow interfaces to the host application's configuration, permission and
//! history storage, with in-process implementations.

use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::message::Message;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Permissions ────────────────────────────────────────────────────────────

/// Which folders and commands the assistant may touch.
pub trait PermissionProvider: Send + Sync + fmt::Debug {
    /// Authorized working directories; the first is the session working directory.
    fn authorized_folders(&self) -> Vec<PathBuf>;

    /// Whether `path` lies inside an authorized folder.
    fn is_path_authorized(&self, path: &Path) -> bool {
        let folders = self.authorized_folders();
        folders.iter().any(|f| path.starts_with(f))
    }

    /// Whether `command` starts with a blacklisted prefix.
    fn is_command_blacklisted(&self, command: &str) -> bool;
}

/// Fixed permission lists, usually taken from the `[workspace]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    folders: Vec<PathBuf>,
    blacklist: Vec<String>,
}

impl StaticPermissions {
    /// Permissions over `folders` with command prefix `blacklist`.
    pub fn new(folders: Vec<PathBuf>, blacklist: Vec<String>) -> Self {
        Self { folders, blacklist }
    }
}

impl PermissionProvider for StaticPermissions {
    fn authorized_folders(&self) -> Vec<PathBuf> {
        self.folders.clone()
    }

    fn is_command_blacklisted(&self, command: &str) -> bool {
        let command = command.trim_start();
        self.blacklist
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .any(|b| command.starts_with(b))
    }
}

// ─── Configuration values ───────────────────────────────────────────────────

/// String key/value configuration lookups.
pub trait ConfigStore: Send + Sync + fmt::Debug {
    /// Value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key` to `value`.
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// In-memory [`ConfigStore`].
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; blank values are ignored.
    pub fn insert(&self, key: &str, value: &str) {
        if !value.trim().is_empty() {
            lock(&self.values).insert(key.to_string(), value.to_string());
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ─── Session history ────────────────────────────────────────────────────────

/// Persists a session's message list after each request.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Replace the stored history of `session_id`.
    fn persist(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()>;

    /// Previously stored history, if any.
    fn load(&self, session_id: &str) -> anyhow::Result<Option<Vec<Message>>>;
}

/// Store that keeps nothing.
#[derive(Debug, Default, Clone)]
pub struct NullSessionStore;

impl SessionStore for NullSessionStore {
    fn persist(&self, _session_id: &str, _messages: &[Message]) -> anyhow::Result<()> {
        Ok(())
    }

    fn load(&self, _session_id: &str) -> anyhow::Result<Option<Vec<Message>>> {
        Ok(None)
    }
}

/// In-memory store, handy for tests and short-lived hosts.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn persist(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        lock(&self.sessions).insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }

    fn load(&self, session_id: &str) -> anyhow::Result<Option<Vec<Message>>> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }
}

/// One pretty-printed JSON file per session under a directory.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
}

impl JsonFileSessionStore {
    /// Store rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding `session_id`'s history.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl SessionStore for JsonFileSessionStore {
    fn persist(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating history dir {}", self.dir.display()))?;
        let path = self.path_for(session_id);
        let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
        let json = serde_json::to_string_pretty(messages)?;
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> anyhow::Result<Option<Vec<Message>>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let messages = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(messages))
    }
}
