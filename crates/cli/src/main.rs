//! lightwire CLI - Main entry point

use anyhow::Result;
use clap::Parser;
use lightwire_cli::{run_cli, Cli, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;
    run_cli(cli).await?;
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let (filter, format) = cli.log_settings();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(cli.verbose >= 2).with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()?,
    }

    Ok(())
}
