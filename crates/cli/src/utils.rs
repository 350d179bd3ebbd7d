//! Shared utilities for CLI commands.

use clap::ValueEnum;
use lightwire_config::ConfigError;
use lightwire_core::StorageError;
use lightwire_odr::OdrError;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// CLI error types
#[derive(Error, Debug)]
pub enum CliError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reputation table could not be read or written
    #[error("Reputation store error: {0}")]
    Store(#[from] StorageError),

    /// Retrieval stack error
    #[error("{0}")]
    Odr(#[from] OdrError),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Refusing to overwrite an existing file
    #[error("{0} already exists, use --force to overwrite")]
    AlreadyExists(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// CLI result type alias
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Output Formatting
// ============================================================================

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for scripting
    Json,
}

/// Print an info message to stderr (so JSON output stays clean)
pub fn print_info(msg: &str) {
    use console::style;
    eprintln!("{} {}", style("[INFO]").cyan().bold(), msg);
}

/// Print a success message to stderr
pub fn print_success(msg: &str) {
    use console::style;
    eprintln!("{} {}", style("[OK]").green().bold(), msg);
}

/// Print a warning message to stderr
pub fn print_warning(msg: &str) {
    use console::style;
    eprintln!("{} {}", style("[WARN]").yellow().bold(), msg);
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format a score with a fixed precision
pub fn format_score(score: f64) -> String {
    format!("{score:>7.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(50.0), "  50.00");
        assert_eq!(format_score(12.5), "  12.50");
    }

    #[test]
    fn test_error_display() {
        let err = CliError::AlreadyExists("lightwire.toml".into());
        assert_eq!(err.to_string(), "lightwire.toml already exists, use --force to overwrite");
    }
}
