//! Data models for Lotbook
//!
//! Every synced record implements [`Entity`], which ties the record to one
//! [`Table`] and exposes the foreign-key values the local store indexes.

mod company;
mod conflict;
mod contact;
mod document;
mod lot;
mod pending;
mod photo;
mod sale;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use company::Company;
pub use conflict::{Conflict, ConflictWinner};
pub use contact::Contact;
pub use document::Document;
pub use lot::Lot;
pub use pending::{MutationKind, PendingMutation};
pub use photo::Photo;
pub use sale::{Sale, SaleStatus};

/// Entity tables mirrored from the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Companies,
    Sales,
    Lots,
    Photos,
    Contacts,
    Documents,
}

impl Table {
    pub const ALL: [Self; 6] = [
        Self::Companies,
        Self::Sales,
        Self::Lots,
        Self::Photos,
        Self::Contacts,
        Self::Documents,
    ];

    /// Table name, shared by the local schema and the remote API.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Sales => "sales",
            Self::Lots => "lots",
            Self::Photos => "photos",
            Self::Contacts => "contacts",
            Self::Documents => "documents",
        }
    }

    /// Secondary index columns maintained for this table.
    #[must_use]
    pub const fn index_keys(self) -> &'static [IndexKey] {
        match self {
            Self::Companies => &[],
            Self::Sales => &[IndexKey::CompanyId, IndexKey::Status],
            Self::Lots => &[IndexKey::SaleId],
            Self::Photos => &[IndexKey::LotId, IndexKey::IsPrimary, IndexKey::Synced],
            Self::Contacts | Self::Documents => &[IndexKey::CompanyId, IndexKey::SaleId],
        }
    }

    /// Whether `key` is indexed on this table.
    #[must_use]
    pub fn has_index(self, key: IndexKey) -> bool {
        self.index_keys().contains(&key)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|table| table.name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown table: {s}")))
    }
}

/// Foreign-key and flag columns usable with `get_all_by_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKey {
    CompanyId,
    SaleId,
    LotId,
    Status,
    IsPrimary,
    Synced,
}

impl IndexKey {
    /// Column name in both the local schema and remote records.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::CompanyId => "company_id",
            Self::SaleId => "sale_id",
            Self::LotId => "lot_id",
            Self::Status => "status",
            Self::IsPrimary => "is_primary",
            Self::Synced => "synced",
        }
    }
}

/// A value stored in an index column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Text(String),
    Bool(bool),
    Null,
}

impl IndexValue {
    pub(crate) fn to_sql(&self) -> libsql::Value {
        match self {
            Self::Text(text) => libsql::Value::Text(text.clone()),
            Self::Bool(flag) => libsql::Value::Integer(i64::from(*flag)),
            Self::Null => libsql::Value::Null,
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<&str>> for IndexValue {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Null, Self::from)
    }
}

/// A record that lives in one of the mirrored entity tables.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table this record belongs to.
    const TABLE: Table;

    /// Primary key.
    fn id(&self) -> &str;

    /// Last modification time, used for last-write-wins.
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// Stamp a local modification time.
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Values for each of `Self::TABLE.index_keys()`, in the same order.
    fn index_values(&self) -> Vec<IndexValue>;

    /// Payload sent to the remote backend. Strips local-only fields.
    fn to_remote(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Generate a client-side id for a record created locally.
#[must_use]
pub fn new_record_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Accept lot numbers and similar identifiers sent either as JSON numbers or strings.
pub(crate) fn deserialize_number_or_string<'de, D>(
    deserializer: D,
) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!(
            "expected number or string, got {other}"
        ))),
    }
}
