//! Remote entity store and blob store seam.
//!
//! The sync engine only talks to the backend through [`RemoteBackend`]. The
//! HTTP implementation speaks a PostgREST-style entity API plus a storage API
//! with signed URLs; the in-memory implementation backs tests and demos.

mod http;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Entity, Table};
use crate::Result;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// One condition on a remote column.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
}

impl Predicate {
    fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Eq { column, value } => record.get(column) == Some(value),
            Self::In { column, values } => record
                .get(column)
                .is_some_and(|field| values.contains(field)),
            Self::IsNull { column } => record.get(column).unwrap_or(&Value::Null).is_null(),
        }
    }
}

/// Conjunction of predicates applied by the remote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn in_list<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.predicates.push(Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.predicates.push(Predicate::IsNull {
            column: column.into(),
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Whether a record satisfies every predicate.
    pub fn matches(&self, record: &Value) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(record))
    }
}

/// Time-limited URL granting read access to a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobReference {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Remote entity and blob operations used by the sync engine.
///
/// Connectivity problems surface as [`crate::Error::Connectivity`], rejected
/// requests as [`crate::Error::RemoteRejected`].
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetch one record by id.
    async fn fetch_entity(&self, table: Table, id: &str) -> Result<Option<Value>>;

    /// Fetch every record matching `filter`.
    async fn fetch_entities(&self, table: Table, filter: &Filter) -> Result<Vec<Value>>;

    /// Insert or merge a record keyed by its `id`.
    async fn upsert_entity(&self, table: Table, record: &Value) -> Result<()>;

    /// Delete a record. Missing records yield [`crate::Error::NotFound`].
    async fn delete_entity(&self, table: Table, id: &str) -> Result<()>;

    /// Issue a signed reference to the blob at `path`.
    async fn blob_reference(&self, path: &str, ttl_secs: u64) -> Result<BlobReference>;

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    async fn download_blob(&self, path: &str) -> Result<Vec<u8>>;
}

/// Fetch and decode records of `E`, skipping records that fail to decode.
pub async fn fetch_all<E: Entity>(remote: &dyn RemoteBackend, filter: &Filter) -> Result<Vec<E>> {
    let records = remote.fetch_entities(E::TABLE, filter).await?;
    Ok(decode_records(E::TABLE, records))
}

pub(crate) fn decode_records<E: Entity>(table: Table, records: Vec<Value>) -> Vec<E> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<E>(record) {
            Ok(entity) => Some(entity),
            Err(error) => {
                tracing::warn!(%table, %error, "Skipping malformed remote record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::Lot;

    #[test]
    fn filter_matches_all_predicates() {
        let filter = Filter::new()
            .eq("company_id", "c1")
            .in_list("status", ["upcoming", "active"])
            .is_null("sale_id");

        assert!(filter.matches(&json!({"company_id": "c1", "status": "active"})));
        assert!(!filter.matches(&json!({"company_id": "c1", "status": "completed"})));
        assert!(!filter.matches(&json!({
            "company_id": "c1",
            "status": "active",
            "sale_id": "s1"
        })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_all_skips_malformed_records() {
        let remote = MemoryRemote::new();
        remote.insert(Table::Lots, json!({"id": "l1", "sale_id": "s1", "lot_number": 1}));
        remote.insert(Table::Lots, json!({"id": "l2"}));

        let lots: Vec<Lot> = fetch_all(&remote, &Filter::new()).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].lot_number, "1");
    }
}
