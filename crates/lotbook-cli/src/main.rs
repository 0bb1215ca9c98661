//! Lotbook CLI - offline-first catalog sync from the command line
//!
//! Pulls a company's active sales into a local cache, pushes offline edits,
//! and exports lots for marketplace upload.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::export::run_export;
use crate::commands::lots::run_lots;
use crate::commands::photo::run_photo;
use crate::commands::sync::{
    run_sync_all, run_sync_conflicts, run_sync_pull, run_sync_push, run_sync_status,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "lotbook=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let remote_config = cli.remote_config.as_deref();

    match cli.command {
        Commands::Sync { command } => match command {
            SyncCommands::Pull { company } => {
                run_sync_pull(&company, &db_path, remote_config).await?;
            }
            SyncCommands::Push => run_sync_push(&db_path, remote_config).await?,
            SyncCommands::All { company } => {
                run_sync_all(&company, &db_path, remote_config).await?;
            }
            SyncCommands::Status { json } => run_sync_status(json, &db_path).await?,
            SyncCommands::Conflicts {
                limit,
                resolve,
                json,
            } => run_sync_conflicts(limit, resolve, json, &db_path).await?,
        },
        Commands::Photo { id, json } => run_photo(&id, json, &db_path, remote_config).await?,
        Commands::Lots { sale, json } => run_lots(&sale, json, &db_path).await?,
        Commands::Export {
            sale,
            format,
            output,
        } => run_export(&sale, format, output.as_deref(), &db_path).await?,
    }

    Ok(())
}
