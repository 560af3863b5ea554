//! `probe` subcommand: show what the environment resolver finds.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::ProbeArgs;
use crate::config::resolve_config;
use crate::environment::{EnvironmentResolver, RuntimeSource, REQUIRED_VERSION};

/// Run the `probe` subcommand.
///
/// Always succeeds once configuration resolves; missing runtimes and
/// executables are reported, not returned as errors.
///
/// # Errors
///
/// Returns an error if configuration resolution fails.
pub async fn run(config_path: &Option<PathBuf>, cwd: &Option<PathBuf>, args: ProbeArgs) -> anyhow::Result<()> {
    let resolved = resolve_config(config_path.as_deref(), cwd.clone())?;
    let bin = args.bin.unwrap_or(resolved.workers.cli_bin);
    let resolver = EnvironmentResolver::system(Duration::from_millis(resolved.workers.probe_timeout_ms));
    let env = resolver.resolve(&bin).await;

    println!("runtime (requires {REQUIRED_VERSION}):");
    match (&env.runtime.path, &env.runtime.version) {
        (Some(path), Some(version)) => {
            let source = match env.runtime.source {
                Some(RuntimeSource::System) => "search path",
                Some(RuntimeSource::Installed) => "version manager",
                None => "unknown",
            };
            println!("  {version} at {} (from {source})", path.display());
        }
        _ => println!(
            "  not found: {}",
            env.runtime.error.as_deref().unwrap_or("no compatible runtime")
        ),
    }

    println!("executable '{bin}':");
    match env.executable {
        Ok(ref path) => println!("  {}", path.display()),
        Err(ref e) => println!("  not found: {e}"),
    }

    println!("search path:");
    for dir in std::env::split_paths(&env.search_path) {
        println!("  {}", dir.display());
    }
    Ok(())
}
