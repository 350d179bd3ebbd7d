//! # lightwire configuration
//!
//! All settings of the on-demand retrieval stack live in one `lightwire.toml`
//! file. Every section has defaults, so an empty file is a valid config.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lightwire_config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("lightwire.toml"))?;
//! println!("request timeout: {}ms", config.request.timeout_ms);
//! ```
//!
//! ## Configuration Sections
//!
//! - `[peers]` - connected server limits and the trusted allowlist
//! - `[pool]` - candidate pool size, dialing and backoff
//! - `[request]` - per-request timeout and retry budget
//! - `[reputation]` - score bounds and adjustment steps
//! - `[cross]` - confirmation registry reader limits
//! - `[logging]` - log level and format

mod config;
mod error;

pub use config::*;
pub use error::*;
