//! CLI argument types for desk-workers.
//!
//! Defines the top-level [`Cli`] struct and all subcommand [`Args`] using
//! clap's derive macros. Each subcommand maps to a module in [`commands`](crate::commands).

use agent_desk_core::config::WorkerVariant;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Drive assistant workers (network API, spawned CLI or streaming SDK) from the terminal
#[derive(Parser, Debug)]
#[command(name = "desk-workers", version, about)]
pub struct Cli {
    /// Path to .desk.toml config file (default: auto-detected)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Working directory for the session (default: first authorized folder)
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one prompt to a worker and print its events
    Ask(AskArgs),
    /// Show runtime discovery and executable lookup
    Probe(ProbeArgs),
    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Arguments for the `ask` subcommand
#[derive(Args, Debug)]
pub struct AskArgs {
    /// Session id (default: a fresh one); history persists per id when
    /// `history_dir` is configured
    #[arg(long)]
    pub session: Option<String>,

    /// Attach an image (png, jpg, gif, webp); repeatable
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// Worker variant override (api, cli, sdk)
    #[arg(long)]
    pub variant: Option<WorkerVariant>,

    /// Approve every confirmation request without asking
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// The prompt
    pub prompt: String,
}

/// Arguments for the `probe` subcommand
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Executable to look up (default: configured `cli_bin`)
    #[arg(long)]
    pub bin: Option<String>,
}

/// Arguments for the `config` subcommand
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
