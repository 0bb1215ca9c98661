//! Error types for lotbook-core

use thiserror::Error;

/// Result type alias using lotbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lotbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No network available; callers fail fast instead of retrying
    #[error("No internet connection: {0}")]
    Connectivity(String),

    /// The remote backend rejected a request for a specific entity or blob
    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    /// A bootstrap call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Local store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether this error comes from the local durable store.
    ///
    /// Storage failures are fatal for a sync attempt.
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LibSql(_) | Self::Io(_))
    }

    /// Whether this error means the network is unavailable.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
