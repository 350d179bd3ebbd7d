//! Discovery topic derivation.

use clap::Parser;
use lightwire_odr::les_topic;
use lightwire_types::B256;

use crate::utils::{print_json, CliError, CliResult, OutputFormat};

/// Arguments for the topic command
#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
pub struct TopicArgs {
    /// Genesis block hash, hex with or without 0x
    #[arg(long)]
    pub genesis: String,

    /// Light protocol version
    #[arg(long, default_value_t = 2)]
    pub version: u32,
}

/// Execute the topic command
pub fn execute(args: TopicArgs, output_format: OutputFormat) -> CliResult<()> {
    let topic = derive_topic(&args)?;
    match output_format {
        OutputFormat::Json => print_json(&serde_json::json!({ "topic": topic })),
        OutputFormat::Text => {
            println!("{topic}");
            Ok(())
        }
    }
}

/// Discovery topic for the arguments
pub fn derive_topic(args: &TopicArgs) -> CliResult<String> {
    let genesis = args.genesis.parse::<B256>()
        .map_err(|e| CliError::InvalidArgument(format!("genesis: {e}")))?;
    Ok(les_topic(&genesis, args.version)?)
}
