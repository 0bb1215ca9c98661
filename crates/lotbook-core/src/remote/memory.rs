//! In-process remote used by tests and offline demos.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{BlobReference, Filter, RemoteBackend};
use crate::models::Table;
use crate::{Error, Result};

/// Remote backend holding tables and blobs in memory.
///
/// Counts the calls the sync engine makes and can inject failures and
/// latency per blob path or record id.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<Table, BTreeMap<String, Value>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing_downloads: Mutex<HashSet<String>>,
    failing_upserts: Mutex<HashSet<String>>,
    failing_uploads: Mutex<HashSet<String>>,
    fetch_delay: Mutex<Option<Duration>>,
    download_delay: Mutex<Option<Duration>>,
    reference_delay: Mutex<Option<Duration>>,
    unreachable: AtomicBool,
    reference_requests: AtomicUsize,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
    in_flight_downloads: AtomicUsize,
    peak_downloads: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as if another client had written it.
    pub fn insert(&self, table: Table, record: Value) {
        let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!(%table, "Ignoring remote record without id");
            return;
        };
        lock(&self.tables)
            .entry(table)
            .or_default()
            .insert(id, record);
    }

    pub fn insert_blob(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        lock(&self.blobs).insert(path.to_string(), bytes.into());
    }

    pub fn record(&self, table: Table, id: &str) -> Option<Value> {
        lock(&self.tables)
            .get(&table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn records(&self, table: Table) -> Vec<Value> {
        lock(&self.tables)
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.blobs).get(path).cloned()
    }

    /// Make downloads of `path` fail with [`Error::RemoteRejected`].
    pub fn fail_downloads_for(&self, path: &str) {
        lock(&self.failing_downloads).insert(path.to_string());
    }

    /// Make upserts of the record `id` fail with [`Error::RemoteRejected`].
    pub fn fail_upserts_for(&self, id: &str) {
        lock(&self.failing_upserts).insert(id.to_string());
    }

    pub fn clear_upsert_failures(&self) {
        lock(&self.failing_upserts).clear();
    }

    /// Make uploads to `path` fail with [`Error::RemoteRejected`].
    pub fn fail_uploads_for(&self, path: &str) {
        lock(&self.failing_uploads).insert(path.to_string());
    }

    pub fn clear_upload_failures(&self) {
        lock(&self.failing_uploads).clear();
    }

    /// Delay every record fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *lock(&self.fetch_delay) = Some(delay);
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *lock(&self.download_delay) = Some(delay);
    }

    pub fn set_reference_delay(&self, delay: Duration) {
        *lock(&self.reference_delay) = Some(delay);
    }

    /// Fail every call with [`Error::Connectivity`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn reference_requests(&self) -> usize {
        self.reference_requests.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Highest number of downloads observed in flight at once.
    pub fn peak_concurrent_downloads(&self) -> usize {
        self.peak_downloads.load(Ordering::SeqCst)
    }

    async fn fetch_latency(&self) {
        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connectivity("remote unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn fetch_entity(&self, table: Table, id: &str) -> Result<Option<Value>> {
        self.ensure_reachable()?;
        self.fetch_latency().await;
        Ok(self.record(table, id))
    }

    async fn fetch_entities(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        self.ensure_reachable()?;
        self.fetch_latency().await;
        Ok(self
            .records(table)
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn upsert_entity(&self, table: Table, record: &Value) -> Result<()> {
        self.ensure_reachable()?;
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput(format!("{table} record has no id")))?;
        if lock(&self.failing_upserts).contains(id) {
            return Err(Error::RemoteRejected(format!("upsert {table} {id}")));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);

        let mut tables = lock(&self.tables);
        let rows = tables.entry(table).or_default();
        match (rows.get_mut(id), record) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    existing.insert(key.clone(), value.clone());
                }
            }
            _ => {
                rows.insert(id.to_string(), record.clone());
            }
        }
        Ok(())
    }

    async fn delete_entity(&self, table: Table, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        let removed = lock(&self.tables)
            .get_mut(&table)
            .and_then(|rows| rows.remove(id));
        if removed.is_none() {
            return Err(Error::NotFound(format!("{table} {id}")));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn blob_reference(&self, path: &str, ttl_secs: u64) -> Result<BlobReference> {
        self.ensure_reachable()?;
        self.reference_requests.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.reference_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !lock(&self.blobs).contains_key(path) {
            return Err(Error::NotFound(format!("blob {path}")));
        }

        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Ok(BlobReference {
            url: format!("memory://{path}?ttl={ttl_secs}"),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.ensure_reachable()?;
        if lock(&self.failing_uploads).contains(path) {
            return Err(Error::RemoteRejected(format!("upload {path}")));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        lock(&self.blobs).insert(path.to_string(), bytes);
        Ok(())
    }

    async fn download_blob(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_reachable()?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight_downloads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_downloads.fetch_max(current, Ordering::SeqCst);

        let delay = *lock(&self.download_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if lock(&self.failing_downloads).contains(path) {
            Err(Error::RemoteRejected(format!("download {path}")))
        } else {
            lock(&self.blobs)
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("blob {path}")))
        };
        self.in_flight_downloads.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_merges_into_existing_record() {
        let remote = MemoryRemote::new();
        remote.insert(Table::Lots, json!({"id": "l1", "title": "Chair", "condition": "fair"}));

        remote
            .upsert_entity(Table::Lots, &json!({"id": "l1", "title": "Armchair"}))
            .await
            .unwrap();

        let record = remote.record(Table::Lots, "l1").unwrap();
        assert_eq!(record["title"], "Armchair");
        assert_eq!(record["condition"], "fair");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_surface_as_errors() {
        let remote = MemoryRemote::new();
        remote.insert_blob("a.jpg", vec![1]);
        remote.fail_downloads_for("a.jpg");
        remote.fail_upserts_for("l1");
        remote.fail_uploads_for("b.jpg");

        assert!(matches!(
            remote.upload_blob("b.jpg", vec![2]).await,
            Err(Error::RemoteRejected(_))
        ));
        assert!(remote.blob("b.jpg").is_none());
        assert!(matches!(
            remote.download_blob("a.jpg").await,
            Err(Error::RemoteRejected(_))
        ));
        assert!(remote
            .upsert_entity(Table::Lots, &json!({"id": "l1"}))
            .await
            .is_err());

        remote.set_unreachable(true);
        assert!(remote
            .fetch_entity(Table::Lots, "l1")
            .await
            .unwrap_err()
            .is_connectivity());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_missing_record_is_not_found() {
        let remote = MemoryRemote::new();
        assert!(matches!(
            remote.delete_entity(Table::Photos, "p1").await,
            Err(Error::NotFound(_))
        ));
    }
}
