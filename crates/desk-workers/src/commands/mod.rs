//! Command implementations for desk-workers subcommands.
//!
//! Each module corresponds to a top-level subcommand exposed by the CLI.

pub mod ask;
pub mod config_cmd;
pub mod probe;
