//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write configuration file
    #[error("Failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration
    #[error("Failed to serialize TOML config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Invalid trusted peer identity
    #[error("Invalid trusted peer id: {0}")]
    InvalidPeerId(String),

    /// Duplicate trusted peer identity
    #[error("Duplicate trusted peer id: {0}")]
    DuplicatePeerId(String),

    /// A count that must be positive was zero
    #[error("Invalid {name}: must be at least 1")]
    ZeroCount { name: &'static str },

    /// Invalid timeout configuration
    #[error("Invalid timeout: {name} must be positive, got {value}ms")]
    InvalidTimeout { name: &'static str, value: u64 },

    /// Backoff ceiling below its base
    #[error("Invalid backoff: backoff_max_ms ({max}) must be >= backoff_base_ms ({base})")]
    InvalidBackoff { base: u64, max: u64 },

    /// Invalid fraction value
    #[error("Invalid {name}: must be between 0.0 and 1.0, got {value}")]
    InvalidFraction { name: &'static str, value: f64 },

    /// Score bounds out of order
    #[error("Invalid reputation bounds: require min < initial < max, got min={min} initial={initial} max={max}")]
    InvalidScoreBounds { min: f64, initial: f64, max: f64 },

    /// Non-positive score adjustment step
    #[error("Invalid reputation step: {name} must be positive, got {value}")]
    InvalidScoreStep { name: &'static str, value: f64 },

    /// Invalid answer must cost more than a timeout
    #[error("Invalid reputation steps: invalid_penalty ({invalid}) must exceed timeout_penalty ({timeout})")]
    PenaltyOrder { timeout: f64, invalid: f64 },

    /// Unsupported light protocol version
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u32),

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: json, pretty")]
    InvalidLogFormat(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
