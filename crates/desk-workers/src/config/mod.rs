//! Configuration resolution for desk-workers.
//!
//! The entry point is [`resolve_config`], which loads the core config and
//! extracts the `[sections.workers]` table into a [`WorkerConfig`].

mod resolve;
mod types;

pub use resolve::{resolve_config, ResolvedConfig, SECTION};
pub use types::WorkerConfig;
