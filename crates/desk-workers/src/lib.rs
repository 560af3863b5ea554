//! desk-workers library crate.
//!
//! Provides the session registry, the three worker variants (network API,
//! spawned CLI process, streaming SDK connection), the stream-json protocol
//! parser, runtime discovery, the confirmation broker, configuration and CLI
//! types for the `desk-workers` binary. Exposed as a library for embedding
//! hosts and integration testing.

pub mod cli;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod environment;
pub mod error;
pub mod events;
pub mod message;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod worker;

#[doc(inline)]
pub use error::WorkerError;
#[doc(inline)]
pub use registry::{ConfiguredWorkerFactory, SessionRegistry, WorkerFactory};
#[doc(inline)]
pub use transport::{MockLauncher, MockLauncherHandle, MockScript};
#[doc(inline)]
pub use worker::{create_worker, Worker, WorkerContext};
