//! Reputation table commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use lightwire_core::{PeerId, ReputationStore, ReputationTable};
use lightwire_odr::FileReputationStore;
use serde::Serialize;

use crate::utils::{format_score, print_info, print_json, print_success, CliResult, OutputFormat};

/// Reputation subcommands
#[derive(Subcommand, Debug)]
pub enum ReputationCommands {
    /// Print the table, best peers first
    Show {
        /// Path to the JSON table
        path: PathBuf,

        /// Only print the first N entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Clear the table so every peer starts neutral
    Reset {
        /// Path to the JSON table
        path: PathBuf,
    },
}

/// One row of the table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReputationEntry {
    /// Peer identity
    pub peer: PeerId,
    /// Stored score
    pub score: f64,
}

/// Execute a reputation subcommand
pub async fn execute(cmd: ReputationCommands, output_format: OutputFormat) -> CliResult<()> {
    match cmd {
        ReputationCommands::Show { path, limit } => {
            let mut entries = load_entries(&path).await?;
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            match output_format {
                OutputFormat::Json => print_json(&entries)?,
                OutputFormat::Text => {
                    if entries.is_empty() {
                        print_info("Reputation table is empty");
                    }
                    for entry in &entries {
                        println!("{}  {}", format_score(entry.score), entry.peer);
                    }
                }
            }
            Ok(())
        }
        ReputationCommands::Reset { path } => {
            let cleared = reset_table(&path).await?;
            match output_format {
                OutputFormat::Json => print_json(&serde_json::json!({ "cleared": cleared })),
                OutputFormat::Text => {
                    print_success(&format!("Cleared {cleared} entries from {}", path.display()));
                    Ok(())
                }
            }
        }
    }
}

/// Entries of the table at `path`, highest score first
pub async fn load_entries(path: &Path) -> CliResult<Vec<ReputationEntry>> {
    let table = FileReputationStore::new(path).load().await?;
    let mut entries: Vec<ReputationEntry> = table
        .into_iter()
        .map(|(peer, score)| ReputationEntry { peer, score })
        .collect();
    entries.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.peer.cmp(&b.peer)));
    Ok(entries)
}

/// Replace the table at `path` with an empty one. Returns the number of
/// entries removed.
pub async fn reset_table(path: &Path) -> CliResult<usize> {
    let store = FileReputationStore::new(path);
    let previous = store.load().await?.len();
    store.save(&ReputationTable::new()).await?;
    Ok(previous)
}
