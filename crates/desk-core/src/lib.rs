//! Core types and utilities for agent-desk.
//!
//! This crate holds the pieces every agent-desk binary shares: tracing
//! initialisation, canonical home-directory resolution, the layered
//! configuration model, and Unicode-safe text helpers.

pub mod config;
pub mod home;
pub mod logging;
pub mod text;

// Re-export toml for section config access
pub use toml;
