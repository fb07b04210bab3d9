#![forbid(unsafe_code)]

//! # snared
//!
//! Daemon wrapper around the [`snare`] decoy server.
//!
//! - [`cli`]: command-line contract (clap derive, `SNARE_*` environment)
//! - [`config`]: layered configuration (defaults, TOML file, env, flags)
//! - [`logging`]: `tracing` subscriber bootstrap
//!
//! The binary in `main.rs` wires these together.

pub mod cli;
pub mod config;
pub mod logging;

pub use cli::Cli;
pub use config::{Config, ConfigError};
