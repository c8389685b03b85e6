//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory
//!   (or an explicit `--config` path).
//! - Writing a starter file with every default spelled out (`--init-config`).
//! - Providing sensible defaults when the file does not exist yet (first run).

pub mod config;
