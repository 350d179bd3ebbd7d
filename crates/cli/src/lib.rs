//! # lightwire CLI
//!
//! Operator tools for the on-demand retrieval stack.
//!
//! ## Available Commands
//!
//! - `config check` - Parse and validate a configuration file
//! - `config init` - Write a configuration file with every default filled in
//! - `reputation show` - Print a persisted reputation table, best peers first
//! - `reputation reset` - Clear a persisted reputation table
//! - `topic` - Derive the discovery topic for a genesis hash
//! - `version` - Display version information
//!
//! ## Example Usage
//!
//! ```bash
//! lightwire config init lightwire.toml
//! lightwire config check lightwire.toml
//! lightwire reputation show data/reputation.json --limit 20
//! lightwire topic --genesis 0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod commands;
pub mod utils;

pub use commands::{run_cli, Cli, Commands, LogFormat};
pub use utils::{CliError, CliResult, OutputFormat};

/// Version information for the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI application name
pub const APP_NAME: &str = "lightwire";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "lightwire.toml";
