//! Configuration file commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use lightwire_config::Config;
use serde::Serialize;

use crate::utils::{print_info, print_json, print_success, print_warning, CliError, CliResult, OutputFormat};

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Parse and validate a configuration file
    Check {
        /// Path to the TOML file
        #[arg(default_value = crate::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },

    /// Write a configuration file with all defaults
    Init {
        /// Path to write
        #[arg(default_value = crate::DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// What `config check` reports about a valid file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    /// Maximum connected servers
    pub light_peers: usize,
    /// Number of trusted servers
    pub trusted: usize,
    /// Trusted-only threshold, when set
    pub min_trusted_fraction: Option<f64>,
    /// Trusted servers are configured
    pub ultra_light: bool,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Retry budget, `None` for one try per eligible peer
    pub max_retries: Option<usize>,
    /// Where reputations persist, if anywhere
    pub reputation_path: Option<PathBuf>,
}

impl From<&Config> for ConfigSummary {
    fn from(config: &Config) -> Self {
        Self {
            light_peers: config.peers.light_peers,
            trusted: config.peers.trusted.len(),
            min_trusted_fraction: config.peers.min_trusted_fraction,
            ultra_light: config.peers.is_ultra_light(),
            timeout_ms: config.request.timeout_ms,
            max_retries: config.request.max_retries,
            reputation_path: config.pool.reputation_path.clone(),
        }
    }
}

/// Execute a config subcommand
pub async fn execute(cmd: ConfigCommands, output_format: OutputFormat) -> CliResult<()> {
    match cmd {
        ConfigCommands::Check { path } => {
            let summary = check_config(&path)?;
            match output_format {
                OutputFormat::Json => print_json(&summary)?,
                OutputFormat::Text => {
                    print_success(&format!("{} is valid", path.display()));
                    println!("  Light peers:     {}", summary.light_peers);
                    println!("  Trusted servers: {}", summary.trusted);
                    if let Some(fraction) = summary.min_trusted_fraction {
                        println!("  Trusted share:   {fraction}");
                    }
                    println!("  Timeout:         {}ms", summary.timeout_ms);
                    match summary.max_retries {
                        Some(n) => println!("  Max retries:     {n}"),
                        None => println!("  Max retries:     one per eligible peer"),
                    }
                    match &summary.reputation_path {
                        Some(p) => println!("  Reputation:      {}", p.display()),
                        None => print_warning("Reputation table is not persisted"),
                    }
                }
            }
            Ok(())
        }
        ConfigCommands::Init { path, force } => {
            init_config(&path, force)?;
            match output_format {
                OutputFormat::Json => print_json(&serde_json::json!({ "written": path })),
                OutputFormat::Text => {
                    print_info(&format!("Wrote default configuration to {}", path.display()));
                    Ok(())
                }
            }
        }
    }
}

/// Load and validate `path`
pub fn check_config(path: &Path) -> CliResult<ConfigSummary> {
    let config = Config::load(path)?;
    config.peers.trusted_ids()?;
    Ok(ConfigSummary::from(&config))
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> CliResult<()> {
    if path.exists() && !force {
        return Err(CliError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Config::default().save(path)?;
    Ok(())
}
