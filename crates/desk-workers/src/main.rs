//! desk-workers: drive assistant workers from the terminal.
//!
//! # Subcommands
//!
//! - `ask`: Send one prompt through the session registry and print events
//! - `probe`: Show runtime discovery and executable lookup
//! - `config`: Show resolved configuration

use agent_desk_core::logging;
use clap::Parser;

use desk_workers::cli::{Cli, Commands};
use desk_workers::commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask(args) => commands::ask::run(&cli.config, &cli.cwd, args).await,
        Commands::Probe(args) => commands::probe::run(&cli.config, &cli.cwd, args).await,
        Commands::Config(args) => commands::config_cmd::run(&cli.config, &cli.cwd, args).await,
    }
}
