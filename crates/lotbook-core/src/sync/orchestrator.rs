//! Staged pull and queued push between the local store and the remote backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::scheduler::{run_with_concurrency, BatchReport};
use super::status::{SyncStage, SyncStatusHub};
use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::media::upload_photo;
use crate::models::{
    Company, ConflictWinner, Contact, Document, Entity, IndexKey, Lot, MutationKind,
    PendingMutation, Photo, Sale, SaleStatus, Table,
};
use crate::remote::{decode_records, fetch_all, Filter, RemoteBackend};
use crate::services::LocalStore;
use crate::{Error, Result};

/// Largest id list sent in a single `in` filter.
const IN_FILTER_CHUNK: usize = 100;

/// Counts from one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub sales: usize,
    pub lots: usize,
    pub contacts: usize,
    pub documents: usize,
    pub primary_photos: usize,
    pub remaining_photos: usize,
    pub primary_downloads: BatchReport,
    pub remaining_downloads: BatchReport,
    pub conflicts: usize,
}

/// Counts from one push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub photos_uploaded: usize,
    pub photos_failed: usize,
    pub mutations_applied: usize,
    pub mutations_failed: usize,
    /// Mutations held back because an earlier one for the same entity failed
    pub mutations_deferred: usize,
    pub pruned: u64,
}

/// Result of [`SyncOrchestrator::sync_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

struct MergeOutcome<E> {
    applied: Vec<E>,
    conflicts: usize,
}

#[derive(Default)]
struct ChainOutcome {
    applied: usize,
    failed: usize,
    deferred: usize,
    offline: bool,
}

/// Drives pulls and pushes for one local store.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: LocalStore,
    remote: Arc<dyn RemoteBackend>,
    status: SyncStatusHub,
    connectivity: ConnectivityMonitor,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteBackend>,
        status: SyncStatusHub,
        connectivity: ConnectivityMonitor,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            status,
            connectivity,
            settings,
        }
    }

    pub fn status(&self) -> &SyncStatusHub {
        &self.status
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Pull the company's active slice into the local store.
    ///
    /// Stages run in order and each commits before the next starts. A failed
    /// stage aborts the pull; earlier stages stay committed.
    pub async fn perform_initial_sync(&self, company_id: &str) -> Result<PullReport> {
        let _operation = self.status.operation();
        self.ensure_online()?;

        match self.pull(company_id).await {
            Ok(report) => {
                self.status.report_stage(SyncStage::Complete);
                tracing::info!(
                    company_id,
                    lots = report.lots,
                    photos = report.primary_photos + report.remaining_photos,
                    conflicts = report.conflicts,
                    "Pull complete"
                );
                Ok(report)
            }
            Err(error) => {
                self.report_failure(&error);
                tracing::error!(company_id, %error, "Pull failed");
                Err(error)
            }
        }
    }

    /// Upload unsynced photos and replay the pending mutation queue.
    pub async fn push_local_changes(&self) -> Result<PushReport> {
        let _operation = self.status.operation();
        self.ensure_online()?;

        match self.push().await {
            Ok(report) => {
                tracing::info!(
                    uploaded = report.photos_uploaded,
                    applied = report.mutations_applied,
                    failed = report.mutations_failed + report.photos_failed,
                    "Push complete"
                );
                Ok(report)
            }
            Err(error) => {
                self.report_failure(&error);
                tracing::error!(%error, "Push failed");
                Err(error)
            }
        }
    }

    /// Push local changes, then pull.
    pub async fn sync_all(&self, company_id: &str) -> Result<SyncReport> {
        let _operation = self.status.operation();
        let push = self.push_local_changes().await?;
        let pull = self.perform_initial_sync(company_id).await?;
        Ok(SyncReport { push, pull })
    }

    fn ensure_online(&self) -> Result<()> {
        if self.connectivity.is_online() {
            return Ok(());
        }
        self.status.report_stage(SyncStage::Offline);
        Err(Error::Connectivity("device is offline".to_string()))
    }

    fn report_failure(&self, error: &Error) {
        if error.is_connectivity() {
            self.status.report_stage(SyncStage::Offline);
        } else {
            self.status.report_error(error.to_string());
        }
    }

    async fn pull(&self, company_id: &str) -> Result<PullReport> {
        let mut report = PullReport::default();

        self.begin_stage(SyncStage::Company);
        let company = self.fetch_company(company_id).await?;
        report.conflicts += self.merge_records(vec![company]).await?.conflicts;

        self.begin_stage(SyncStage::Sales);
        let sales_filter = Filter::new()
            .eq("company_id", company_id)
            .in_list("status", SaleStatus::SYNCABLE.map(SaleStatus::as_str));
        let sales: Vec<Sale> = fetch_all(self.remote.as_ref(), &sales_filter).await?;
        let sales: Vec<Sale> = sales
            .into_iter()
            .filter(|sale| sale.status.is_syncable())
            .collect();
        let sale_ids: Vec<String> = sales.iter().map(|sale| sale.id.clone()).collect();
        report.sales = sales.len();
        report.conflicts += self.merge_records(sales).await?.conflicts;

        self.begin_stage(SyncStage::Lots);
        let lots: Vec<Lot> = self.fetch_by_ids(Filter::new(), "sale_id", &sale_ids).await?;
        let lot_ids: Vec<String> = lots.iter().map(|lot| lot.id.clone()).collect();
        report.lots = lots.len();
        report.conflicts += self.merge_records(lots).await?.conflicts;

        self.begin_stage(SyncStage::Contacts);
        let contacts: Vec<Contact> = self.fetch_dual_scope(company_id, &sale_ids).await?;
        report.contacts = contacts.len();
        report.conflicts += self.merge_records(contacts).await?.conflicts;

        self.begin_stage(SyncStage::PrimaryPhotos);
        let primary: Vec<Photo> = self
            .fetch_by_ids(Filter::new().eq("is_primary", true), "lot_id", &lot_ids)
            .await?;
        report.primary_photos = primary.len();
        let (conflicts, downloads) = self.sync_photos(primary).await?;
        report.conflicts += conflicts;
        report.primary_downloads = downloads;

        self.begin_stage(SyncStage::Documents);
        let documents: Vec<Document> = self.fetch_dual_scope(company_id, &sale_ids).await?;
        report.documents = documents.len();
        report.conflicts += self.merge_records(documents).await?.conflicts;

        self.begin_stage(SyncStage::RemainingPhotos);
        let remaining: Vec<Photo> = self
            .fetch_by_ids(Filter::new().eq("is_primary", false), "lot_id", &lot_ids)
            .await?;
        report.remaining_photos = remaining.len();
        let (conflicts, downloads) = self.sync_photos(remaining).await?;
        report.conflicts += conflicts;
        report.remaining_downloads = downloads;

        self.store.set_last_sync_time(Utc::now()).await?;
        Ok(report)
    }

    fn begin_stage(&self, stage: SyncStage) {
        tracing::info!(stage = %stage, step = stage.step(), "Sync stage");
        self.status.report_stage(stage);
    }

    async fn fetch_company(&self, company_id: &str) -> Result<Company> {
        let fetch = self.remote.fetch_entity(Table::Companies, company_id);
        let record = tokio::time::timeout(self.settings.bootstrap_timeout, fetch)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "fetching company {company_id} took longer than {:?}",
                    self.settings.bootstrap_timeout
                ))
            })??
            .ok_or_else(|| Error::NotFound(format!("company {company_id}")))?;
        Ok(serde_json::from_value(record)?)
    }

    /// Fetch records whose `column` is one of `ids`, chunking long lists.
    async fn fetch_by_ids<E: Entity>(
        &self,
        base: Filter,
        column: &str,
        ids: &[String],
    ) -> Result<Vec<E>> {
        let mut records = Vec::new();
        for chunk in ids.chunks(IN_FILTER_CHUNK) {
            let filter = base.clone().in_list(column, chunk.iter().cloned());
            records.extend(self.remote.fetch_entities(E::TABLE, &filter).await?);
        }
        Ok(decode_records(E::TABLE, records))
    }

    /// Company-scoped records plus records owned by one of the synced sales.
    async fn fetch_dual_scope<E: Entity>(
        &self,
        company_id: &str,
        sale_ids: &[String],
    ) -> Result<Vec<E>> {
        let company_scoped = Filter::new().eq("company_id", company_id).is_null("sale_id");
        let (mut records, sale_scoped) = tokio::try_join!(
            fetch_all::<E>(self.remote.as_ref(), &company_scoped),
            self.fetch_by_ids::<E>(Filter::new(), "sale_id", sale_ids),
        )?;
        records.extend(sale_scoped);
        Ok(records)
    }

    /// Apply pulled records without losing unsynced local writes.
    ///
    /// A record with queued local mutations is left alone unless the remote
    /// copy changed since the last pull. Then the newer `updated_at` wins, the
    /// remote wins ties, and a conflict is logged once per record. A remote
    /// win discards the queued writes.
    async fn merge_records<E: Entity>(&self, records: Vec<E>) -> Result<MergeOutcome<E>> {
        let last_sync = self
            .store
            .last_sync_time()
            .await?
            .map(|at| at.timestamp_millis());
        let mut pending: HashMap<String, Vec<PendingMutation>> = HashMap::new();
        for mutation in self.store.list_pending_mutations().await? {
            if mutation.table == E::TABLE {
                pending
                    .entry(mutation.record_id.clone())
                    .or_default()
                    .push(mutation);
            }
        }

        let mut outcome = MergeOutcome {
            applied: Vec::with_capacity(records.len()),
            conflicts: 0,
        };
        for record in records {
            let Some(local_writes) = pending.get(record.id()) else {
                self.store.upsert(&record).await?;
                outcome.applied.push(record);
                continue;
            };

            // A missing remote timestamp never counts as newer.
            let remote_changed_at = record
                .updated_at()
                .map(|at| at.timestamp_millis())
                .filter(|&remote| last_sync.map_or(true, |since| remote > since));
            let Some(remote_millis) = remote_changed_at else {
                tracing::debug!(
                    table = %E::TABLE,
                    record_id = record.id(),
                    "Remote record unchanged since last pull; keeping local change"
                );
                continue;
            };

            let local: Option<E> = self.store.get(record.id()).await?;
            let local_millis = local
                .as_ref()
                .and_then(|entity| entity.updated_at())
                .map(|at| at.timestamp_millis())
                .or_else(|| local_writes.iter().map(|m| m.timestamp).max());
            let winner = if local_millis.is_some_and(|local| local > remote_millis) {
                ConflictWinner::Local
            } else {
                ConflictWinner::Remote
            };

            let local_data = match &local {
                Some(entity) => serde_json::to_value(entity)?,
                None => Value::Null,
            };
            let logged = self
                .store
                .record_conflict(E::TABLE, record.id(), &local_data, &record.to_remote()?, winner)
                .await?;
            if logged.is_some() {
                outcome.conflicts += 1;
            }
            tracing::warn!(
                table = %E::TABLE,
                record_id = record.id(),
                %winner,
                "Pulled record conflicts with an unsynced local change"
            );

            if winner == ConflictWinner::Local {
                continue;
            }
            let discarded = self.store.accept_remote_version(&record).await?;
            tracing::debug!(record_id = record.id(), discarded, "Discarded local changes");
            outcome.applied.push(record);
        }
        Ok(outcome)
    }

    /// Merge photo metadata, keep one primary per lot, then fetch missing blobs.
    ///
    /// A local photo that was never uploaded stays unsynced even when its
    /// blob is present.
    async fn sync_photos(&self, photos: Vec<Photo>) -> Result<(usize, BatchReport)> {
        let mut prepared = Vec::with_capacity(photos.len());
        let mut stored_blobs = HashSet::new();
        for mut photo in photos {
            let has_blob = self.store.has_blob(&photo.id).await?;
            let local: Option<Photo> = self.store.get(&photo.id).await?;
            photo.synced = has_blob && local.as_ref().map_or(true, |local| local.synced);
            if has_blob {
                stored_blobs.insert(photo.id.clone());
            }
            prepared.push(photo);
        }

        let outcome = self.merge_records(prepared).await?;
        self.demote_replaced_primaries(&outcome.applied).await?;

        let missing: Vec<Photo> = outcome
            .applied
            .into_iter()
            .filter(|photo| !stored_blobs.contains(&photo.id))
            .collect();
        let results = run_with_concurrency(
            missing,
            self.settings.photo_download_concurrency,
            |photo| self.download_photo(photo),
        )
        .await;

        let mut downloads = BatchReport::default();
        for result in results {
            match result {
                Ok(()) => downloads.succeeded += 1,
                Err(error) if error.is_storage_failure() => return Err(error),
                Err(_) => downloads.failed += 1,
            }
        }
        if downloads.failed > 0 {
            tracing::warn!(
                succeeded = downloads.succeeded,
                failed = downloads.failed,
                "Some photo downloads failed; they stay unsynced"
            );
        }
        Ok((outcome.conflicts, downloads))
    }

    async fn demote_replaced_primaries(&self, applied: &[Photo]) -> Result<()> {
        let mut seen_lots = HashSet::new();
        for photo in applied.iter().filter(|photo| photo.is_primary) {
            if !seen_lots.insert(photo.lot_id.as_str()) {
                continue;
            }
            let siblings: Vec<Photo> = self
                .store
                .get_all_by_index(IndexKey::LotId, photo.lot_id.as_str())
                .await?;
            for mut sibling in siblings
                .into_iter()
                .filter(|sibling| sibling.is_primary && sibling.id != photo.id)
            {
                tracing::debug!(lot_id = %photo.lot_id, photo_id = %sibling.id, "Demoting replaced primary photo");
                sibling.is_primary = false;
                self.store.upsert(&sibling).await?;
            }
        }
        Ok(())
    }

    async fn download_photo(&self, photo: Photo) -> Result<()> {
        let bytes = self
            .remote
            .download_blob(&photo.file_path)
            .await
            .inspect_err(|error| {
                tracing::warn!(photo_id = %photo.id, %error, "Photo download failed");
            })?;
        self.store.put_blob(&photo.id, &bytes).await?;
        self.store.mark_photo_synced(&photo.id).await?;
        Ok(())
    }

    async fn push(&self) -> Result<PushReport> {
        let mut report = PushReport::default();

        let unsynced: Vec<Photo> = self.store.get_all_by_index(IndexKey::Synced, false).await?;
        let mut uploadable = Vec::with_capacity(unsynced.len());
        for photo in unsynced {
            if self.store.has_blob(&photo.id).await? {
                uploadable.push(photo);
            }
        }
        let upload_ids: Vec<String> = uploadable.iter().map(|photo| photo.id.clone()).collect();
        let uploads = run_with_concurrency(uploadable, self.settings.push_concurrency, |photo| async move {
            upload_photo(&self.store, self.remote.as_ref(), &photo)
                .await
                .inspect_err(|error| {
                    tracing::warn!(photo_id = %photo.id, %error, "Photo upload failed");
                })
        })
        .await;
        let mut offline = false;
        let mut failed_uploads = HashSet::new();
        for (photo_id, result) in upload_ids.into_iter().zip(uploads) {
            match result {
                Ok(_) => report.photos_uploaded += 1,
                Err(error) if error.is_storage_failure() => return Err(error),
                Err(error) => {
                    offline |= error.is_connectivity();
                    report.photos_failed += 1;
                    failed_uploads.insert(photo_id);
                }
            }
        }

        // Photo metadata waits until its blob is uploaded.
        let (chains, held): (Vec<_>, Vec<_>) =
            group_by_entity(self.store.list_pending_mutations().await?)
                .into_iter()
                .partition(|chain| {
                    chain.first().map_or(true, |first| {
                        first.table != Table::Photos || !failed_uploads.contains(&first.record_id)
                    })
                });
        report.mutations_deferred += held.iter().map(Vec::len).sum::<usize>();
        let outcomes = run_with_concurrency(chains, self.settings.push_concurrency, |chain| {
            self.apply_chain(chain)
        })
        .await;
        for outcome in outcomes {
            let outcome = outcome?;
            report.mutations_applied += outcome.applied;
            report.mutations_failed += outcome.failed;
            report.mutations_deferred += outcome.deferred;
            offline |= outcome.offline;
        }

        report.pruned = self.store.prune_synced_mutations().await?;

        if offline {
            return Err(Error::Connectivity(format!(
                "{} change(s) left queued",
                report.mutations_failed + report.mutations_deferred + report.photos_failed
            )));
        }
        Ok(report)
    }

    /// Apply one entity's mutations in order, stopping at the first failure.
    async fn apply_chain(&self, chain: Vec<PendingMutation>) -> Result<ChainOutcome> {
        let mut outcome = ChainOutcome::default();
        let total = chain.len();
        for (index, mutation) in chain.into_iter().enumerate() {
            match self.apply_mutation(&mutation).await {
                Ok(()) => {
                    self.store.mark_mutation_synced(&mutation.id).await?;
                    outcome.applied += 1;
                }
                Err(error) if error.is_storage_failure() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        table = %mutation.table,
                        record_id = %mutation.record_id,
                        kind = %mutation.kind,
                        %error,
                        "Pending mutation failed; leaving it queued"
                    );
                    outcome.offline = error.is_connectivity();
                    outcome.failed = 1;
                    outcome.deferred = total - index - 1;
                    break;
                }
            }
        }
        Ok(outcome)
    }

    async fn apply_mutation(&self, mutation: &PendingMutation) -> Result<()> {
        match mutation.kind {
            MutationKind::Create | MutationKind::Update => {
                self.remote
                    .upsert_entity(mutation.table, &mutation.data)
                    .await
            }
            MutationKind::Delete => {
                match self
                    .remote
                    .delete_entity(mutation.table, &mutation.record_id)
                    .await
                {
                    Ok(()) | Err(Error::NotFound(_)) => {}
                    Err(error) => return Err(error),
                }
                self.store
                    .delete(mutation.table, &mutation.record_id)
                    .await?;
                if mutation.table == Table::Photos {
                    self.store.delete_blob(&mutation.record_id).await?;
                }
                Ok(())
            }
        }
    }
}

/// Group mutations by target entity, keeping enqueue order within each group.
fn group_by_entity(mutations: Vec<PendingMutation>) -> Vec<Vec<PendingMutation>> {
    let mut positions: HashMap<(Table, String), usize> = HashMap::new();
    let mut chains: Vec<Vec<PendingMutation>> = Vec::new();
    for mutation in mutations {
        let key = (mutation.table, mutation.record_id.clone());
        if let Some(&position) = positions.get(&key) {
            chains[position].push(mutation);
        } else {
            positions.insert(key, chains.len());
            chains.push(vec![mutation]);
        }
    }
    chains
}
