//! Thread-safe local store shared by the sync engine and UI callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlStoreRepository, StoreRepository, LAST_SYNC_TIME_KEY};
use crate::models::{
    Conflict, ConflictWinner, Entity, IndexKey, IndexValue, MutationKind, PendingMutation, Photo,
    Table,
};
use crate::{Error, Result};

/// Durable local cache guarded by an async mutex.
///
/// Each call takes the lock for its own duration only, so callers must not
/// assume atomicity across several awaited calls.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh cache is created,
    /// since everything in it can be pulled again.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local cache at {} is unreadable ({}); starting from an empty cache",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = Utc::now().timestamp_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "lotbook.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local cache from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }
        Ok(())
    }

    /// Insert or replace an entity.
    pub async fn upsert<E: Entity>(&self, entity: &E) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .upsert(entity)
            .await
    }

    /// Upsert a batch; every row is its own atomic write.
    pub async fn upsert_many<E: Entity>(&self, entities: &[E]) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlStoreRepository::new(db.connection());
        for entity in entities {
            repo.upsert(entity).await?;
        }
        Ok(())
    }

    /// Fetch a live entity by id.
    pub async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection()).get(id).await
    }

    /// List all live entities of a table.
    pub async fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection()).get_all().await
    }

    /// List live entities by a secondary index.
    pub async fn get_all_by_index<E: Entity>(
        &self,
        key: IndexKey,
        value: impl Into<IndexValue>,
    ) -> Result<Vec<E>> {
        let value = value.into();
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .get_all_by_index(key, &value)
            .await
    }

    /// Physically remove an entity row.
    pub async fn delete(&self, table: Table, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .delete(table, id)
            .await
    }

    pub async fn put_blob(&self, photo_id: &str, bytes: &[u8]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .put_blob(photo_id, bytes)
            .await
    }

    pub async fn get_blob(&self, photo_id: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .get_blob(photo_id)
            .await
    }

    /// Flag a photo's bytes as present on both sides. Touches only the flag.
    pub async fn mark_photo_synced(&self, photo_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .mark_photo_synced(photo_id)
            .await
    }

    pub async fn has_blob(&self, photo_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .has_blob(photo_id)
            .await
    }

    pub async fn delete_blob(&self, photo_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .delete_blob(photo_id)
            .await
    }

    pub async fn enqueue_pending_mutation(&self, mutation: &PendingMutation) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .enqueue_pending_mutation(mutation)
            .await
    }

    /// Unsynced mutations in enqueue order.
    pub async fn list_pending_mutations(&self) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .list_pending_mutations()
            .await
    }

    pub async fn pending_mutation_count(&self) -> Result<usize> {
        Ok(self.list_pending_mutations().await?.len())
    }

    pub async fn mark_mutation_synced(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .mark_mutation_synced(id)
            .await
    }

    pub async fn prune_synced_mutations(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .prune_synced_mutations()
            .await
    }

    /// Log a conflict unless the record already has an unresolved one.
    ///
    /// Returns the new row id, or `None` when an open conflict was already logged.
    pub async fn record_conflict(
        &self,
        table: Table,
        record_id: &str,
        local_data: &serde_json::Value,
        cloud_data: &serde_json::Value,
        winner: ConflictWinner,
    ) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        let repo = LibSqlStoreRepository::new(db.connection());
        if repo.has_unresolved_conflict(table, record_id).await? {
            return Ok(None);
        }
        repo.record_conflict(table, record_id, local_data, cloud_data, winner)
            .await
            .map(Some)
    }

    /// Replace the local record with the remote one and drop its unsynced writes.
    ///
    /// Used after a conflict the remote side won. Returns how many queued
    /// mutations were discarded.
    pub async fn accept_remote_version<E: Entity>(&self, record: &E) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let repo = LibSqlStoreRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let mut discarded = 0;
        let result = async {
            discarded = repo.discard_pending_mutations(E::TABLE, record.id()).await?;
            repo.upsert(record).await
        }
        .await;
        finish_transaction(conn, result).await?;

        Ok(discarded)
    }

    pub async fn list_unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .list_unresolved_conflicts()
            .await
    }

    pub async fn resolve_conflict(&self, id: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .resolve_conflict(id)
            .await
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .set_metadata(key, value)
            .await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .get_metadata(key)
            .await
    }

    /// Time of the last fully successful pull.
    pub async fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get_metadata(LAST_SYNC_TIME_KEY).await? else {
            return Ok(None);
        };
        let millis = raw
            .parse::<i64>()
            .map_err(|_| Error::Storage(format!("invalid {LAST_SYNC_TIME_KEY} value: {raw}")))?;
        Ok(DateTime::from_timestamp_millis(millis))
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_metadata(LAST_SYNC_TIME_KEY, &at.timestamp_millis().to_string())
            .await
    }

    /// Wipe every table (e.g. on sign-out or company switch).
    pub async fn clear_all(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStoreRepository::new(db.connection())
            .clear_all()
            .await
    }

    /// Write an entity locally, stamped with the current time, and queue it for push.
    pub async fn record_local_upsert<E: Entity>(
        &self,
        entity: &E,
        kind: MutationKind,
    ) -> Result<PendingMutation> {
        self.write_local(entity.clone(), kind)
            .await
            .map(|(_, mutation)| mutation)
    }

    async fn write_local<E: Entity>(
        &self,
        mut entity: E,
        kind: MutationKind,
    ) -> Result<(E, PendingMutation)> {
        if kind == MutationKind::Delete {
            return Err(Error::InvalidInput(
                "use record_local_delete for deletions".to_string(),
            ));
        }
        entity.set_updated_at(Utc::now());
        let mutation = PendingMutation::new(kind, E::TABLE, entity.id(), entity.to_remote()?);

        let db = self.db.lock().await;
        let conn = db.connection();
        let repo = LibSqlStoreRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            repo.upsert(&entity).await?;
            repo.enqueue_pending_mutation(&mutation).await
        }
        .await;
        finish_transaction(conn, result).await?;

        Ok((entity, mutation))
    }

    /// Tombstone an entity and queue the remote delete.
    ///
    /// The row is removed for good once the push confirms the delete.
    pub async fn record_local_delete(&self, table: Table, id: &str) -> Result<PendingMutation> {
        let mutation = PendingMutation::new(
            MutationKind::Delete,
            table,
            id,
            serde_json::json!({ "id": id }),
        );

        let db = self.db.lock().await;
        let conn = db.connection();
        let repo = LibSqlStoreRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            if !repo.mark_deleted(table, id, mutation.timestamp).await? {
                return Err(Error::NotFound(format!("{table} {id}")));
            }
            repo.enqueue_pending_mutation(&mutation).await
        }
        .await;
        finish_transaction(conn, result).await?;

        Ok(mutation)
    }

    /// Make `photo_id` the only primary photo of `lot_id` (clear-then-set).
    ///
    /// Returns the photos whose flag changed; each change is queued for push.
    pub async fn set_primary_photo(&self, lot_id: &str, photo_id: &str) -> Result<Vec<Photo>> {
        let photos: Vec<Photo> = self.get_all_by_index(IndexKey::LotId, lot_id).await?;
        if !photos.iter().any(|photo| photo.id == photo_id) {
            return Err(Error::NotFound(format!("photo {photo_id} in lot {lot_id}")));
        }

        let mut changed = Vec::new();
        // Clear before set.
        for mut photo in photos.iter().filter(|p| p.is_primary && p.id != photo_id).cloned() {
            photo.is_primary = false;
            let (photo, _) = self.write_local(photo, MutationKind::Update).await?;
            changed.push(photo);
        }
        if let Some(mut photo) = photos
            .into_iter()
            .find(|p| p.id == photo_id && !p.is_primary)
        {
            photo.is_primary = true;
            let (photo, _) = self.write_local(photo, MutationKind::Update).await?;
            changed.push(photo);
        }

        Ok(changed)
    }
}

async fn finish_transaction(conn: &libsql::Connection, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(())
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}
