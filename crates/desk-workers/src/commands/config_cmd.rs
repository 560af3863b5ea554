//! `config` subcommand: show resolved configuration.
//!
//! Loads the full resolved configuration and prints it either as JSON
//! (`--json`) or as a human-readable key=value table. The credential itself
//! is never printed, only whether it is set.

use crate::cli::ConfigArgs;
use crate::config::{resolve_config, ResolvedConfig, WorkerConfig};
use std::path::PathBuf;

/// Run the `config` subcommand.
///
/// # Errors
///
/// Returns an error if config resolution fails (e.g., unreadable TOML file or
/// home directory cannot be determined).
pub async fn run(config_path: &Option<PathBuf>, cwd: &Option<PathBuf>, args: ConfigArgs) -> anyhow::Result<()> {
    let resolved: ResolvedConfig = resolve_config(config_path.as_deref(), cwd.clone())?;
    let cfg: &WorkerConfig = &resolved.workers;
    let credential_set = resolved.credential().is_some();

    if args.json {
        let json = serde_json::json!({
            "core": {
                "variant": resolved.core.variant(),
                "credential_env": resolved.core.credential_env(),
                "credential_set": credential_set,
            },
            "workspace": resolved.workspace,
            "workers": cfg,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("desk-workers configuration:");
        println!("  cli_bin              = {}", cfg.cli_bin);
        println!(
            "  model                = {}",
            cfg.model.as_deref().unwrap_or("<unset>")
        );
        println!("  base_url             = {}", cfg.base_url);
        println!("  api_version          = {}", cfg.api_version);
        println!("  max_tokens           = {}", cfg.max_tokens);
        println!("  confirm_tools        = {}", cfg.confirm_tools.join(", "));
        println!("  confirm_timeout_secs = {}", cfg.confirm_timeout_secs);
        println!("  probe_timeout_ms     = {}", cfg.probe_timeout_ms);
        println!(
            "  history_dir          = {}",
            cfg.history_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string())
        );

        println!();
        println!("core configuration:");
        println!("  variant        = {}", resolved.core.variant());
        println!(
            "  credential_env = {} ({})",
            resolved.core.credential_env(),
            if credential_set { "set" } else { "unset" }
        );

        println!();
        println!("workspace:");
        if resolved.workspace.authorized_folders.is_empty() {
            println!("  authorized_folders   = (none)");
        } else {
            println!("  authorized_folders:");
            for folder in &resolved.workspace.authorized_folders {
                println!("    {}", folder.display());
            }
        }
        if !resolved.workspace.blacklisted_commands.is_empty() {
            println!(
                "  blacklisted_commands = {}",
                resolved.workspace.blacklisted_commands.join(", ")
            );
        }
    }

    Ok(())
}
