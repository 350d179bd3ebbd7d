//! CLI command definitions and handlers.

pub mod config;
pub mod reputation;
pub mod topic;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lightwire_config::{Config, LoggingConfig};

use crate::utils::{print_json, CliResult, OutputFormat};

/// lightwire - on-demand retrieval for header-only nodes
#[derive(Parser, Debug)]
#[command(name = "lightwire")]
#[command(version)]
#[command(about = "Operator tools for the lightwire retrieval stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Global output format for command results
    #[arg(global = true, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Log format, overrides `[logging] format`
    #[arg(global = true, long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Configuration file whose `[logging]` section sets the log defaults
    #[arg(global = true, long = "config", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(global = true, short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl Cli {
    /// Log filter directive and format.
    ///
    /// `-q` and `-v` win over the configured level, `--log-format` over the
    /// configured format. An unreadable `--config` falls back to defaults.
    pub fn log_settings(&self) -> (String, LogFormat) {
        let logging = self
            .config_file
            .as_deref()
            .and_then(|path| Config::load(path).ok())
            .map(|config| config.logging)
            .unwrap_or_default();

        let filter = match (self.quiet, self.verbose) {
            (true, _) => "error".to_string(),
            (_, 0) => format!("warn,lightwire={}", logging.level.to_lowercase()),
            (_, 1) => "info,lightwire=debug".to_string(),
            (_, _) => "debug,lightwire=trace".to_string(),
        };
        let format = self.log_format.unwrap_or_else(|| configured_format(&logging));
        (filter, format)
    }
}

fn configured_format(logging: &LoggingConfig) -> LogFormat {
    if logging.format.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration file tools
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Persisted reputation table tools
    #[command(subcommand)]
    Reputation(reputation::ReputationCommands),

    /// Derive the discovery topic for a chain
    Topic(topic::TopicArgs),

    /// Show version information
    Version,
}

/// Execute the CLI with parsed arguments
pub async fn run_cli(cli: Cli) -> CliResult<()> {
    tracing::debug!(command = ?cli.command, "Running command");
    match cli.command {
        Commands::Config(cmd) => config::execute(cmd, cli.output).await,
        Commands::Reputation(cmd) => reputation::execute(cmd, cli.output).await,
        Commands::Topic(args) => topic::execute(args, cli.output),
        Commands::Version => execute_version(cli.output),
    }
}

fn execute_version(output_format: OutputFormat) -> CliResult<()> {
    let version = crate::VERSION;
    match output_format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "name": crate::APP_NAME,
            "version": version,
            "target": format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        })),
        OutputFormat::Text => {
            println!("{} {}", crate::APP_NAME, version);
            Ok(())
        }
    }
}
