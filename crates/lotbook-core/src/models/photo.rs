//! Photo metadata model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, IndexValue, Table};
use crate::error::Result;

/// Photo metadata. The bytes live separately in the blob table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub lot_id: String,
    /// Remote blob locator
    pub file_path: String,
    #[serde(default)]
    pub is_primary: bool,
    /// Local-only: bytes are known to exist on both sides
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Photo {
    /// Create metadata for a photo captured on this device.
    #[must_use]
    pub fn new_local(lot_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: super::new_record_id(),
            lot_id: lot_id.into(),
            file_path: file_path.into(),
            is_primary: false,
            synced: false,
            display_order: None,
            updated_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }
}

impl Entity for Photo {
    const TABLE: Table = Table::Photos;

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
            IndexValue::from(self.lot_id.as_str()),
            IndexValue::from(self.is_primary),
            IndexValue::from(self.synced),
        ]
    }

    fn to_remote(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            fields.remove("synced");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_payload_omits_local_sync_flag() {
        let mut photo = Photo::new_local("lot-1", "lots/lot-1/a.jpg");
        photo.synced = true;

        let remote = photo.to_remote().unwrap();
        assert!(remote.get("synced").is_none());
        assert_eq!(remote["file_path"], "lots/lot-1/a.jpg");
    }

    #[test]
    fn remote_photo_defaults_to_unsynced() {
        let photo: Photo = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "lot_id": "l1",
            "file_path": "lots/l1/p1.jpg",
            "is_primary": true
        }))
        .unwrap();
        assert!(photo.is_primary);
        assert!(!photo.synced);
    }
}
