use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lotbook_core::models::{Conflict, IndexKey};
use lotbook_core::{
    ConnectivityMonitor, HttpRemote, LocalStore, Lot, Photo, RemoteBackend, RemoteConfig,
    SyncOrchestrator, SyncSettings, SyncStatusHub,
};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct LotListItem {
    pub id: String,
    pub lot_number: String,
    pub title: String,
    pub photo_count: usize,
    pub primary_photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: i64,
    pub table: String,
    pub record_id: String,
    pub winner: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub local_data: serde_json::Value,
    pub cloud_data: serde_json::Value,
}

/// Everything a command needs to talk to the remote backend.
pub struct RemoteSession {
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteBackend>,
    pub connectivity: ConnectivityMonitor,
    pub settings: SyncSettings,
}

impl RemoteSession {
    pub fn orchestrator(&self) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            SyncStatusHub::new(self.settings.status_clear_delay),
            self.connectivity.clone(),
            self.settings.clone(),
        )
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("LOTBOOK_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("lotbook").join("lotbook.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(db_path).await?)
}

/// Remote settings from `--remote-config`, falling back to the environment.
pub fn load_remote_config(config_path: Option<&Path>) -> Result<Option<RemoteConfig>, CliError> {
    if let Some(path) = config_path {
        return Ok(Some(RemoteConfig::load_file(path)?));
    }
    Ok(RemoteConfig::from_env()?)
}

pub async fn open_remote_session(
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<RemoteSession, CliError> {
    let config = load_remote_config(config_path)?.ok_or(CliError::RemoteNotConfigured)?;
    tracing::debug!(api_url = %config.api_url, "Using remote backend");

    let connectivity = ConnectivityMonitor::new(true);
    let remote = HttpRemote::new(config)?.with_connectivity(connectivity.clone());
    Ok(RemoteSession {
        store: open_store(db_path).await?,
        remote: Arc::new(remote),
        connectivity,
        settings: SyncSettings::default(),
    })
}

/// Lots of a sale ordered by lot number, with their photos.
pub async fn list_sale_lots(
    store: &LocalStore,
    sale_id: &str,
) -> Result<Vec<(Lot, Vec<Photo>)>, CliError> {
    let mut lots: Vec<Lot> = store.get_all_by_index(IndexKey::SaleId, sale_id).await?;
    lots.sort_by_key(Lot::sort_key);

    let mut entries = Vec::with_capacity(lots.len());
    for lot in lots {
        let photos: Vec<Photo> = store
            .get_all_by_index(IndexKey::LotId, lot.id.as_str())
            .await?;
        entries.push((lot, photos));
    }
    Ok(entries)
}

pub fn lot_to_list_item(lot: &Lot, photos: &[Photo]) -> LotListItem {
    LotListItem {
        id: lot.id.clone(),
        lot_number: lot.lot_number.clone(),
        title: lot.title.clone(),
        photo_count: photos.len(),
        primary_photo: photos
            .iter()
            .find(|photo| photo.is_primary)
            .map(|photo| photo.file_path.clone()),
    }
}

pub fn format_lot_lines(entries: &[(Lot, Vec<Photo>)]) -> Vec<String> {
    entries
        .iter()
        .map(|(lot, photos)| {
            let offline = photos.iter().filter(|photo| photo.synced).count();
            format!(
                "{:>6}  {}  [{} photo(s), {} offline]  {}",
                lot.lot_number,
                truncate(&lot.title, 48),
                photos.len(),
                offline,
                lot.id
            )
        })
        .collect()
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        id: conflict.id,
        table: conflict.table.to_string(),
        record_id: conflict.record_id.clone(),
        winner: conflict.winner.to_string(),
        detected_at: conflict.timestamp,
        detected_at_iso: format_sync_timestamp(conflict.timestamp),
        local_data: conflict.local_data.clone(),
        cloud_data: conflict.cloud_data.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  #{:<4} {}/{}  ({} kept)",
                format_sync_timestamp(conflict.timestamp),
                conflict.id,
                conflict.table,
                conflict.record_id,
                conflict.winner
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}
