//! Runtime and executable discovery.
//!
//! The assistant's command-line tool runs on Node.js, and desktop apps are
//! often launched with a minimal `PATH` that misses version-manager installs.
//! [`EnvironmentResolver`] finds a compatible runtime (the one on the
//! inherited search path first, then versioned installs under nvm, volta,
//! fnm, n and Homebrew), builds an augmented search path, and locates the
//! assistant executable on it. Every OS interaction goes through
//! [`EnvironmentProbe`] so the logic is testable with a fake filesystem.

use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the runtime binary.
pub const RUNTIME_BIN: &str = if cfg!(windows) { "node.exe" } else { "node" };

/// Semantic version triple parsed from `v18.20.8`-style names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl Version {
    /// Construct a version.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `v22.1.0`, `22.1.0` or `22.1.0-nightly`. Anything else yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed.split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Whether this runtime can run the assistant tool:
    /// major >= 20, or 18.x newer than 18.20.8.
    pub fn is_compatible(&self) -> bool {
        self.major >= 20
            || (self.major == 18
                && (self.minor > 20 || (self.minor == 20 && self.patch >= 8)))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Human-readable minimum version requirement.
pub const REQUIRED_VERSION: &str = "v18.20.8 or v20+";

/// A directory holding one subdirectory per installed runtime version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot {
    /// Version manager name, for messages
    pub manager: &'static str,
    /// Directory containing `<version>/` entries
    pub dir: PathBuf,
    /// Path from a version directory to its `bin` directory
    pub bin_subpath: PathBuf,
}

impl InstallRoot {
    fn new(manager: &'static str, dir: PathBuf, bin_subpath: &str) -> Self {
        Self {
            manager,
            dir,
            bin_subpath: PathBuf::from(bin_subpath),
        }
    }
}

/// Known installation roots for the given home directory.
pub fn default_install_roots(home: Option<&Path>) -> Vec<InstallRoot> {
    let mut roots = Vec::new();

    if let Some(home) = home {
        let nvm_dir = std::env::var_os("NVM_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".nvm"));
        roots.push(InstallRoot::new("nvm", nvm_dir.join("versions/node"), "bin"));
        roots.push(InstallRoot::new(
            "volta",
            home.join(".volta/tools/image/node"),
            "bin",
        ));

        let fnm_dirs = match std::env::var_os("FNM_DIR").filter(|v| !v.is_empty()) {
            Some(dir) => vec![PathBuf::from(dir)],
            None => vec![
                home.join(".local/share/fnm"),
                home.join(".fnm"),
                home.join("Library/Application Support/fnm"),
            ],
        };
        for dir in fnm_dirs {
            roots.push(InstallRoot::new(
                "fnm",
                dir.join("node-versions"),
                "installation/bin",
            ));
        }
    }

    let n_prefix = std::env::var_os("N_PREFIX")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/usr/local"));
    roots.push(InstallRoot::new("n", n_prefix.join("n/versions/node"), "bin"));

    for cellar in ["/opt/homebrew/Cellar/node", "/usr/local/Cellar/node"] {
        roots.push(InstallRoot::new("homebrew", PathBuf::from(cellar), "bin"));
    }

    roots
}

/// User-level bin directories worth adding to a desktop app's search path.
pub fn common_bin_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = home {
        dirs.push(home.join(".claude/local"));
        dirs.push(home.join(".npm-global/bin"));
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".volta/bin"));
        dirs.push(home.join(".bun/bin"));
    }
    for path in ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"] {
        dirs.push(PathBuf::from(path));
    }
    dirs
}

/// OS access used by the resolver.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    /// Names of the entries in `dir`; empty when it does not exist.
    fn list_dir(&self, dir: &Path) -> Vec<String>;

    /// Whether `path` is an existing regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// The inherited search path (`PATH`).
    fn inherited_path(&self) -> OsString;

    /// Locate executable `name` on `search_path`.
    fn find_executable(&self, name: &str, search_path: &OsStr) -> Option<PathBuf>;

    /// Run `<runtime> --version` with a bounded wait. Failure or timeout is
    /// logged and yields `None`.
    async fn runtime_version(&self, runtime: &Path) -> Option<Version>;
}

/// [`EnvironmentProbe`] backed by the real filesystem and process table.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    /// Probe whose version checks give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl EnvironmentProbe for SystemProbe {
    fn list_dir(&self, dir: &Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn inherited_path(&self) -> OsString {
        std::env::var_os("PATH").unwrap_or_default()
    }

    fn find_executable(&self, name: &str, search_path: &OsStr) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(name, Some(search_path), cwd).ok()
    }

    async fn runtime_version(&self, runtime: &Path) -> Option<Version> {
        let mut cmd = tokio::process::Command::new(runtime);
        cmd.arg("--version")
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = Version::parse(stdout.trim());
                if version.is_none() {
                    warn!(runtime = %runtime.display(), output = %stdout.trim(), "unrecognized runtime version output");
                }
                version
            }
            Ok(Ok(output)) => {
                warn!(runtime = %runtime.display(), status = %output.status, "runtime version probe failed");
                None
            }
            Ok(Err(e)) => {
                warn!(runtime = %runtime.display(), error = %e, "runtime version probe could not run");
                None
            }
            Err(_) => {
                warn!(runtime = %runtime.display(), timeout_ms = self.timeout.as_millis() as u64, "runtime version probe timed out");
                None
            }
        }
    }
}

/// Probe with fixed answers and no filesystem access.
///
/// Useful for hosts that pin the runtime and executable up front, and for
/// tests that must not depend on what the machine has installed.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    runtime: Option<(PathBuf, Version)>,
    executables: Vec<(String, PathBuf)>,
    path: OsString,
}

impl StaticProbe {
    /// Probe with no runtime, no executables and an empty `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `path` as the runtime on the search path, at `version`.
    pub fn with_runtime(mut self, path: impl Into<PathBuf>, version: Version) -> Self {
        self.runtime = Some((path.into(), version));
        self
    }

    /// Report `name` as found at `path`.
    pub fn with_executable(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.executables.push((name.into(), path.into()));
        self
    }

    /// Inherited `PATH` value.
    pub fn with_path(mut self, path: impl Into<OsString>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl EnvironmentProbe for StaticProbe {
    fn list_dir(&self, _dir: &Path) -> Vec<String> {
        Vec::new()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.executables.iter().any(|(_, p)| p == path)
            || self.runtime.as_ref().is_some_and(|(p, _)| p == path)
    }

    fn inherited_path(&self) -> OsString {
        self.path.clone()
    }

    fn find_executable(&self, name: &str, _search_path: &OsStr) -> Option<PathBuf> {
        if name == RUNTIME_BIN {
            return self.runtime.as_ref().map(|(p, _)| p.clone());
        }
        self.executables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }

    async fn runtime_version(&self, runtime: &Path) -> Option<Version> {
        self.runtime
            .as_ref()
            .filter(|(p, _)| p == runtime)
            .map(|(_, v)| *v)
    }
}

/// Where a runtime was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSource {
    /// On the inherited search path
    System,
    /// Under a version manager's installation root
    Installed,
}

/// Outcome of runtime discovery. Never an error value: when nothing
/// compatible exists `path` is `None` and `error` explains why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeResolution {
    /// Runtime binary
    pub path: Option<PathBuf>,
    /// Its version
    pub version: Option<Version>,
    /// Where it came from
    pub source: Option<RuntimeSource>,
    /// Why nothing was found
    pub error: Option<String>,
}

impl RuntimeResolution {
    fn found(path: PathBuf, version: Version, source: RuntimeSource) -> Self {
        Self {
            path: Some(path),
            version: Some(version),
            source: Some(source),
            error: None,
        }
    }

    fn missing(error: String) -> Self {
        Self {
            path: None,
            version: None,
            source: None,
            error: Some(error),
        }
    }

    /// Directory holding the runtime binary.
    pub fn bin_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }
}

/// Everything a worker needs to launch the assistant executable.
#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    /// Runtime discovery outcome
    pub runtime: RuntimeResolution,
    /// Search path to hand to the child (`PATH`)
    pub search_path: OsString,
    /// Absolute executable path, or why it could not be found
    pub executable: Result<PathBuf, String>,
}

impl ResolvedEnvironment {
    /// Program to launch: the resolved path, or the configured name when
    /// lookup failed so that the spawn error names it.
    pub fn program(&self, configured: &str) -> PathBuf {
        match self.executable {
            Ok(ref path) => path.clone(),
            Err(_) => PathBuf::from(configured),
        }
    }
}

/// Runtime discovery and executable lookup.
#[derive(Clone)]
pub struct EnvironmentResolver {
    probe: Arc<dyn EnvironmentProbe>,
    roots: Vec<InstallRoot>,
    extra_bin_dirs: Vec<PathBuf>,
}

impl fmt::Debug for EnvironmentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentResolver")
            .field("roots", &self.roots)
            .field("extra_bin_dirs", &self.extra_bin_dirs)
            .finish()
    }
}

impl EnvironmentResolver {
    /// Resolver over explicit roots and extra bin directories.
    pub fn new(
        probe: Arc<dyn EnvironmentProbe>,
        roots: Vec<InstallRoot>,
        extra_bin_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            probe,
            roots,
            extra_bin_dirs,
        }
    }

    /// Resolver for this machine using the default roots under the user's home.
    pub fn system(probe_timeout: Duration) -> Self {
        let home = agent_desk_core::home::get_home_dir().ok();
        Self::new(
            Arc::new(SystemProbe::new(probe_timeout)),
            default_install_roots(home.as_deref()),
            common_bin_dirs(home.as_deref()),
        )
    }

    /// Scan installation roots for the newest compatible runtime.
    ///
    /// Version directories are parsed from their names; unparsable names are
    /// skipped. Candidates are tried newest first and the first whose binary
    /// exists wins.
    pub fn find_compatible_runtime(&self) -> RuntimeResolution {
        let mut candidates: Vec<(Version, PathBuf)> = Vec::new();
        let mut any_root = false;

        for root in &self.roots {
            let names = self.probe.list_dir(&root.dir);
            if names.is_empty() {
                continue;
            }
            any_root = true;
            for name in names {
                match Version::parse(&name) {
                    Some(version) => {
                        let bin = root.dir.join(&name).join(&root.bin_subpath).join(RUNTIME_BIN);
                        candidates.push((version, bin));
                    }
                    None => debug!(manager = root.manager, name, "skipping unversioned entry"),
                }
            }
        }

        if !any_root {
            return RuntimeResolution::missing(
                "No Node.js installation found. Install Node.js v20 or later (nvm, volta, fnm, n or Homebrew are detected automatically).".to_string(),
            );
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        let mut seen = Vec::new();
        for (version, bin) in &candidates {
            if !version.is_compatible() {
                seen.push(version.to_string());
                continue;
            }
            if self.probe.is_file(bin) {
                info!(version = %version, path = %bin.display(), "found compatible runtime");
                return RuntimeResolution::found(bin.clone(), *version, RuntimeSource::Installed);
            }
            debug!(path = %bin.display(), "runtime binary missing");
        }

        let found = if seen.is_empty() {
            "none usable".to_string()
        } else {
            seen.join(", ")
        };
        RuntimeResolution::missing(format!(
            "No compatible Node.js found (requires {REQUIRED_VERSION}; found: {found})."
        ))
    }

    /// Prefer the runtime on the inherited search path; otherwise scan the
    /// installation roots.
    pub async fn resolve_runtime(&self) -> RuntimeResolution {
        let inherited = self.probe.inherited_path();
        let system = self.probe.find_executable(RUNTIME_BIN, &inherited);

        let mut system_version = None;
        if let Some(ref path) = system {
            if let Some(version) = self.probe.runtime_version(path).await {
                if version.is_compatible() {
                    debug!(version = %version, path = %path.display(), "using system runtime");
                    return RuntimeResolution::found(path.clone(), version, RuntimeSource::System);
                }
                system_version = Some(version);
            }
        }

        let mut resolution = self.find_compatible_runtime();
        if let (Some(version), Some(error)) = (system_version, resolution.error.as_mut()) {
            error.push_str(&format!(" The Node.js on PATH is {version}."));
        }
        if let Some(ref error) = resolution.error {
            warn!(%error, "no compatible runtime");
        }
        resolution
    }

    /// Runtime bin dir, then common bin dirs, then the inherited `PATH`,
    /// without duplicates.
    pub fn augmented_search_path(&self, runtime: &RuntimeResolution) -> OsString {
        let inherited = self.probe.inherited_path();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        let leading = runtime.bin_dir().map(Path::to_path_buf);
        for dir in leading
            .into_iter()
            .chain(self.extra_bin_dirs.iter().cloned())
            .chain(std::env::split_paths(&inherited))
        {
            if dir.as_os_str().is_empty() {
                continue;
            }
            if seen.insert(dir.clone()) {
                entries.push(dir);
            }
        }

        match std::env::join_paths(&entries) {
            Ok(joined) => joined,
            Err(e) => {
                warn!(error = %e, "could not assemble search path, using inherited PATH");
                inherited
            }
        }
    }

    /// Absolute path of `executable` on `search_path`.
    ///
    /// A configured absolute (or relative-with-separator) path is accepted
    /// as-is when the file exists.
    pub fn resolve_executable(&self, executable: &str, search_path: &OsStr) -> Result<PathBuf, String> {
        let candidate = Path::new(executable);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            if self.probe.is_file(candidate) {
                return Ok(candidate.to_path_buf());
            }
            return Err(format!("'{executable}' does not exist"));
        }
        self.probe
            .find_executable(executable, search_path)
            .ok_or_else(|| format!("'{executable}' was not found on the search path"))
    }

    /// Runtime, search path, and executable location in one step.
    pub async fn resolve(&self, executable: &str) -> ResolvedEnvironment {
        let runtime = self.resolve_runtime().await;
        let search_path = self.augmented_search_path(&runtime);
        let resolved = self.resolve_executable(executable, &search_path);
        if let Err(ref e) = resolved {
            warn!(executable, error = %e, "executable lookup failed");
        }
        ResolvedEnvironment {
            runtime,
            search_path,
            executable: resolved,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory probe: directory listings, existing files, a PATH value and
    /// runtime versions keyed by binary path.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub dirs: HashMap<PathBuf, Vec<String>>,
        pub files: HashSet<PathBuf>,
        pub path: OsString,
        pub executables: HashMap<String, PathBuf>,
        pub versions: HashMap<PathBuf, Version>,
    }

    #[async_trait]
    impl EnvironmentProbe for FakeProbe {
        fn list_dir(&self, dir: &Path) -> Vec<String> {
            self.dirs.get(dir).cloned().unwrap_or_default()
        }

        fn is_file(&self, path: &Path) -> bool {
            self.files.contains(path)
        }

        fn inherited_path(&self) -> OsString {
            self.path.clone()
        }

        fn find_executable(&self, name: &str, _search_path: &OsStr) -> Option<PathBuf> {
            self.executables.get(name).cloned()
        }

        async fn runtime_version(&self, runtime: &Path) -> Option<Version> {
            self.versions.get(runtime).copied()
        }
    }

    fn nvm_root() -> InstallRoot {
        InstallRoot::new("nvm", PathBuf::from("/h/.nvm/versions/node"), "bin")
    }

    fn probe_with_versions(names: &[&str]) -> FakeProbe {
        let mut probe = FakeProbe::default();
        let root = nvm_root();
        probe.dirs.insert(
            root.dir.clone(),
            names.iter().map(|s| s.to_string()).collect(),
        );
        for name in names {
            probe
                .files
                .insert(root.dir.join(name).join("bin").join(RUNTIME_BIN));
        }
        probe
    }

    fn resolver(probe: FakeProbe) -> EnvironmentResolver {
        EnvironmentResolver::new(Arc::new(probe), vec![nvm_root()], Vec::new())
    }

    // ─── Version rule ────────────────────────────────────────────────────────

    #[test]
    fn version_parse_and_compatibility() {
        assert_eq!(Version::parse("v18.20.8"), Some(Version::new(18, 20, 8)));
        assert_eq!(Version::parse("22.1.0"), Some(Version::new(22, 1, 0)));
        assert_eq!(Version::parse("v23.0.0-nightly2024"), Some(Version::new(23, 0, 0)));
        assert_eq!(Version::parse("system"), None);
        assert_eq!(Version::parse("v18.20"), None);

        assert!(Version::new(20, 0, 0).is_compatible());
        assert!(Version::new(18, 20, 8).is_compatible());
        assert!(Version::new(18, 21, 0).is_compatible());
        assert!(!Version::new(18, 20, 7).is_compatible());
        assert!(!Version::new(18, 19, 9).is_compatible());
        assert!(!Version::new(16, 99, 99).is_compatible());
    }

    // ─── Root scanning ───────────────────────────────────────────────────────

    #[test]
    fn selects_newest_compatible_version() {
        let resolver = resolver(probe_with_versions(&["v16.0.0", "v18.20.8", "v18.19.0", "v22.1.0"]));
        let resolution = resolver.find_compatible_runtime();
        assert_eq!(
            resolution.path,
            Some(PathBuf::from("/h/.nvm/versions/node/v22.1.0/bin").join(RUNTIME_BIN))
        );
        assert_eq!(resolution.version, Some(Version::new(22, 1, 0)));
        assert!(resolution.error.is_none());
    }

    #[test]
    fn only_incompatible_versions_yield_error() {
        let resolver = resolver(probe_with_versions(&["v16.0.0"]));
        let resolution = resolver.find_compatible_runtime();
        assert!(resolution.path.is_none());
        let error = resolution.error.unwrap();
        assert!(!error.is_empty());
        assert!(error.contains("v16.0.0"));
    }

    #[test]
    fn no_roots_yield_error() {
        let resolution = resolver(FakeProbe::default()).find_compatible_runtime();
        assert!(resolution.path.is_none());
        assert!(resolution.error.is_some());
    }

    #[test]
    fn skips_unparsable_names_and_missing_binaries() {
        let mut probe = probe_with_versions(&["v22.1.0", "v20.11.1"]);
        let root = nvm_root();
        probe.files.remove(&root.dir.join("v22.1.0/bin").join(RUNTIME_BIN));
        probe
            .dirs
            .get_mut(&root.dir)
            .unwrap()
            .push("alias".to_string());

        let resolution = resolver(probe).find_compatible_runtime();
        assert_eq!(resolution.version, Some(Version::new(20, 11, 1)));
    }

    // ─── System runtime ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn compatible_system_runtime_wins() {
        let mut probe = probe_with_versions(&["v22.1.0"]);
        probe
            .executables
            .insert(RUNTIME_BIN.to_string(), PathBuf::from("/usr/bin/node"));
        probe
            .versions
            .insert(PathBuf::from("/usr/bin/node"), Version::new(20, 3, 0));

        let resolution = resolver(probe).resolve_runtime().await;
        assert_eq!(resolution.source, Some(RuntimeSource::System));
        assert_eq!(resolution.path, Some(PathBuf::from("/usr/bin/node")));
    }

    #[tokio::test]
    async fn old_system_runtime_falls_back_to_roots() {
        let mut probe = probe_with_versions(&["v16.0.0"]);
        probe
            .executables
            .insert(RUNTIME_BIN.to_string(), PathBuf::from("/usr/bin/node"));
        probe
            .versions
            .insert(PathBuf::from("/usr/bin/node"), Version::new(16, 20, 0));

        let resolution = resolver(probe).resolve_runtime().await;
        assert!(resolution.path.is_none());
        assert!(resolution.error.unwrap().contains("v16.20.0"));
    }

    // ─── Search path and executable ──────────────────────────────────────────

    #[test]
    fn augmented_path_puts_runtime_first_and_dedupes() {
        let mut probe = FakeProbe::default();
        probe.path = std::env::join_paths(["/usr/bin", "/extra/bin", "/usr/bin"]).unwrap();
        let resolver = EnvironmentResolver::new(
            Arc::new(probe),
            Vec::new(),
            vec![PathBuf::from("/extra/bin")],
        );
        let runtime = RuntimeResolution::found(
            PathBuf::from("/rt/bin/node"),
            Version::new(22, 0, 0),
            RuntimeSource::Installed,
        );

        let joined = resolver.augmented_search_path(&runtime);
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/rt/bin"),
                PathBuf::from("/extra/bin"),
                PathBuf::from("/usr/bin"),
            ]
        );
    }

    #[test]
    fn resolve_executable_tolerates_lookup_failure() {
        let mut probe = FakeProbe::default();
        probe
            .executables
            .insert("claude".to_string(), PathBuf::from("/opt/bin/claude"));
        probe.files.insert(PathBuf::from("/custom/claude"));
        let resolver = EnvironmentResolver::new(Arc::new(probe), Vec::new(), Vec::new());
        let path = OsString::from("/opt/bin");

        assert_eq!(
            resolver.resolve_executable("claude", &path),
            Ok(PathBuf::from("/opt/bin/claude"))
        );
        assert_eq!(
            resolver.resolve_executable("/custom/claude", &path),
            Ok(PathBuf::from("/custom/claude"))
        );
        assert!(resolver.resolve_executable("missing", &path).is_err());
        assert!(resolver.resolve_executable("/nope/claude", &path).is_err());
    }

    #[test]
    fn system_probe_scans_real_directories() {
        let temp = tempfile::TempDir::new().unwrap();
        let root_dir = temp.path().join("versions/node");
        for name in ["v18.19.0", "v20.10.0", "not-a-version"] {
            let bin = root_dir.join(name).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join(RUNTIME_BIN), "").unwrap();
        }

        let resolver = EnvironmentResolver::new(
            Arc::new(SystemProbe::new(Duration::from_millis(500))),
            vec![InstallRoot::new("nvm", root_dir.clone(), "bin")],
            Vec::new(),
        );
        let resolution = resolver.find_compatible_runtime();
        assert_eq!(
            resolution.path,
            Some(root_dir.join("v20.10.0/bin").join(RUNTIME_BIN))
        );
    }

    #[tokio::test]
    async fn static_probe_resolves_pinned_environment() {
        let probe = StaticProbe::new()
            .with_runtime("/opt/node/bin/node", Version::new(22, 1, 0))
            .with_executable("claude", "/opt/node/bin/claude")
            .with_path("/usr/bin");
        let resolver = EnvironmentResolver::new(Arc::new(probe), Vec::new(), Vec::new());

        let env = resolver.resolve("claude").await;
        assert_eq!(env.runtime.source, Some(RuntimeSource::System));
        assert_eq!(env.executable, Ok(PathBuf::from("/opt/node/bin/claude")));
        let dirs: Vec<PathBuf> = std::env::split_paths(&env.search_path).collect();
        assert_eq!(dirs[0], PathBuf::from("/opt/node/bin"));
    }
}
