//! Lot model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{deserialize_number_or_string, Entity, IndexValue, Table};

/// A catalogued item offered in one sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: String,
    pub sale_id: String,
    /// Catalogue number; may be alphanumeric (e.g. `12A`)
    #[serde(deserialize_with = "deserialize_number_or_string")]
    pub lot_number: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Lot {
    /// Sort key that orders `2` before `10` and `12` before `12A`.
    #[must_use]
    pub fn sort_key(&self) -> (u64, String) {
        let digits: String = self
            .lot_number
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let numeric = digits.parse().unwrap_or(u64::MAX);
        (numeric, self.lot_number[digits.len()..].to_string())
    }
}

impl Entity for Lot {
    const TABLE: Table = Table::Lots;

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
        vec![IndexValue::from(self.sale_id.as_str())]
    }
}
