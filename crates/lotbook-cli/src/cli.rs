use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "lotbook")]
#[command(about = "Offline-first catalog sync for auction houses")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// JSON file with remote backend settings (environment variables otherwise)
    #[arg(long, global = true, value_name = "PATH")]
    pub remote_config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull, push, and inspect sync state
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Resolve how a photo can be displayed
    Photo {
        /// Photo ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the lots of a sale from the local cache
    Lots {
        /// Sale ID
        #[arg(long, value_name = "ID")]
        sale: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a sale's lots for marketplace upload
    Export {
        /// Sale ID
        #[arg(long, value_name = "ID")]
        sale: String,
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Download the company's active sales into the local cache
    Pull {
        /// Company ID
        #[arg(long, value_name = "ID")]
        company: String,
    },
    /// Upload local photos and queued changes
    Push,
    /// Push queued changes, then pull
    All {
        /// Company ID
        #[arg(long, value_name = "ID")]
        company: String,
    },
    /// Show last sync time and queued work
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List unresolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Mark the conflict with this id as resolved instead of listing
        #[arg(long, value_name = "ID")]
        resolve: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
