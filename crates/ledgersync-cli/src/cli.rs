use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ledgersync_core::EntityType;

#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(about = "Inspect and drive the local-first ledger sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Tenant to operate on (falls back to LEDGERSYNC_TENANT)
    #[arg(long, global = true, value_name = "ID")]
    pub tenant: Option<String>,

    /// Directory holding the tenant databases
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// JSON file with the backend connection (falls back to LEDGERSYNC_API_* variables)
    #[arg(long, global = true, value_name = "PATH")]
    pub backend_config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update a local record
    Put {
        /// Collection of the record
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// Record as a JSON object (read from stdin when omitted)
        record: Option<String>,
    },
    /// Delete a local record
    #[command(alias = "rm")]
    Delete {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// Record ID
        id: String,
    },
    /// Merge a JSON array of records into a collection and queue the changes
    Import {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// File with a JSON array of records
        path: PathBuf,
    },
    /// List local records of a collection
    List {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a full sync pass
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued local changes only
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue statistics and the derived sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and repair the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between full sync passes
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List every queue entry
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return entries stuck in `processing` to `pending`
    ResetStuck {
        /// Seconds an entry may stay in `processing`
        #[arg(long, value_name = "SECS", default_value = "30")]
        timeout_secs: u64,
    },
    /// Give entries that ran out of attempts another try
    Retry,
    /// Drop entries that ran out of attempts
    ClearExhausted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

pub fn parse_entity_type(raw: &str) -> Result<EntityType, String> {
    raw.parse::<EntityType>().map_err(|_| {
        let known = EntityType::ALL
            .iter()
            .map(|entity_type| entity_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown entity type '{raw}' (expected one of: {known})")
    })
}
