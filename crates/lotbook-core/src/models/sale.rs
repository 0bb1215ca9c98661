//! Sale model

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, IndexValue, Table};

/// Lifecycle state of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Upcoming,
    Active,
    Completed,
}

impl SaleStatus {
    /// Statuses eligible for offline sync.
    pub const SYNCABLE: [Self; 2] = [Self::Upcoming, Self::Active];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Upcoming and active sales are synced; completed ones are not.
    #[must_use]
    pub const fn is_syncable(self) -> bool {
        matches!(self, Self::Upcoming | Self::Active)
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auction sale belonging to a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub company_id: String,
    #[serde(default)]
    pub name: String,
    pub status: SaleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Sale {
    const TABLE: Table = Table::Sales;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    fn index_values(&self) -> Vec<IndexValue> {
        vec![
            IndexValue::from(self.company_id.as_str()),
            IndexValue::from(self.status.as_str()),
        ]
    }
}
