use std::path::Path;

use lotbook_core::models::IndexKey;
use lotbook_core::sync::{PullReport, PushReport, SyncOrchestrator};
use lotbook_core::Photo;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_relative_time, format_sync_timestamp,
    open_remote_session, open_store, ConflictItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct SyncStatusItem {
    last_sync_time: Option<String>,
    pending_mutations: usize,
    unsynced_photos: usize,
    unresolved_conflicts: usize,
}

/// Print stage changes to stderr while an operation runs.
fn spawn_progress_printer(orchestrator: &SyncOrchestrator) -> JoinHandle<()> {
    let mut progress = orchestrator.status().on_progress_change();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = progress.borrow_and_update().clone();
            if let Some(current) = current {
                eprintln!("[{}/{}] {}", current.current, current.total, current.stage);
            }
        }
    })
}

fn print_pull_report(report: &PullReport) {
    println!(
        "Pulled {} sale(s), {} lot(s), {} contact(s), {} document(s)",
        report.sales, report.lots, report.contacts, report.documents
    );
    let mut downloads = report.primary_downloads;
    downloads.absorb(report.remaining_downloads);
    println!(
        "Photos: {} primary, {} other; downloaded {}, failed {}",
        report.primary_photos, report.remaining_photos, downloads.succeeded, downloads.failed
    );
    if report.conflicts > 0 {
        println!(
            "{} conflict(s) recorded; see `lotbook sync conflicts`",
            report.conflicts
        );
    }
}

fn print_push_report(report: &PushReport) {
    println!(
        "Uploaded {} photo(s), applied {} change(s)",
        report.photos_uploaded, report.mutations_applied
    );
    let left = report.photos_failed + report.mutations_failed + report.mutations_deferred;
    if left > 0 {
        println!("{left} item(s) left queued for the next push");
    }
}

pub async fn run_sync_pull(
    company_id: &str,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_remote_session(db_path, config_path).await?;
    let orchestrator = session.orchestrator();
    let printer = spawn_progress_printer(&orchestrator);

    let result = orchestrator.perform_initial_sync(company_id).await;
    printer.abort();

    print_pull_report(&result?);
    Ok(())
}

pub async fn run_sync_push(db_path: &Path, config_path: Option<&Path>) -> Result<(), CliError> {
    let session = open_remote_session(db_path, config_path).await?;
    let report = session.orchestrator().push_local_changes().await?;
    print_push_report(&report);
    Ok(())
}

pub async fn run_sync_all(
    company_id: &str,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_remote_session(db_path, config_path).await?;
    let orchestrator = session.orchestrator();
    let printer = spawn_progress_printer(&orchestrator);

    let result = orchestrator.sync_all(company_id).await;
    printer.abort();

    let report = result?;
    print_push_report(&report.push);
    print_pull_report(&report.pull);
    Ok(())
}

pub async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let last_sync = store.last_sync_time().await?;
    let unsynced: Vec<Photo> = store.get_all_by_index(IndexKey::Synced, false).await?;
    let item = SyncStatusItem {
        last_sync_time: last_sync.map(|at| format_sync_timestamp(at.timestamp_millis())),
        pending_mutations: store.pending_mutation_count().await?,
        unsynced_photos: unsynced.len(),
        unresolved_conflicts: store.list_unresolved_conflicts().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    match last_sync {
        Some(at) => println!(
            "Last sync: {} ({})",
            format_sync_timestamp(at.timestamp_millis()),
            format_relative_time(at.timestamp_millis(), chrono::Utc::now().timestamp_millis())
        ),
        None => println!("Last sync: never"),
    }
    println!("Pending changes: {}", item.pending_mutations);
    println!("Unsynced photos: {}", item.unsynced_photos);
    println!("Unresolved conflicts: {}", item.unresolved_conflicts);
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    resolve: Option<i64>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    if let Some(id) = resolve {
        store.resolve_conflict(id).await?;
        println!("Resolved conflict {id}");
        return Ok(());
    }
    let mut conflicts = store.list_unresolved_conflicts().await?;
    conflicts.truncate(limit);

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No unresolved sync conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
