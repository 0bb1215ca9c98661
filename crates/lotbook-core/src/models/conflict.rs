//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Table;
use crate::error::Error;

/// Which side's version was kept when the conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    /// The unsynced local write stays queued for push
    Local,
    /// The remote record replaced the local one and the queued writes were discarded
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ConflictWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictWinner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::InvalidInput(format!("Unknown conflict winner: {other}"))),
        }
    }
}

/// The same record changed locally (unsynced) and remotely since the last pull.
///
/// Last-write-wins is applied when the conflict is recorded; the row stays
/// unresolved until someone reviews it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict row identifier
    pub id: i64,
    pub table: Table,
    pub record_id: String,
    /// Local version at the time of the pull
    pub local_data: serde_json::Value,
    /// Remote version received by the pull
    pub cloud_data: serde_json::Value,
    pub winner: ConflictWinner,
    /// Detection timestamp (Unix ms)
    pub timestamp: i64,
    pub resolved: bool,
}
