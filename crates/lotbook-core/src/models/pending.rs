//! Pending mutation queue model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Table;
use crate::error::Error;

/// Kind of local write awaiting remote confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown mutation kind: {other}"))),
        }
    }
}

/// A locally-originated write not yet confirmed by the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    pub kind: MutationKind,
    pub table: Table,
    /// Id of the entity this mutation targets
    pub record_id: String,
    /// Remote payload (the full record for create/update)
    pub data: serde_json::Value,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub synced: bool,
}

impl PendingMutation {
    /// Build a new unsynced mutation with a fresh id.
    #[must_use]
    pub fn new(
        kind: MutationKind,
        table: Table,
        record_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: super::new_record_id(),
            kind,
            table,
            record_id: record_id.into(),
            data,
            timestamp: crate::util::now_millis(),
            synced: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_kind_parses() {
        assert_eq!("update".parse::<MutationKind>().unwrap(), MutationKind::Update);
        assert!("upsert".parse::<MutationKind>().is_err());
    }

    #[test]
    fn new_mutation_is_unsynced() {
        let mutation = PendingMutation::new(
            MutationKind::Delete,
            Table::Lots,
            "lot-1",
            serde_json::Value::Null,
        );
        assert!(!mutation.synced);
        assert_eq!(mutation.record_id, "lot-1");
    }
}
