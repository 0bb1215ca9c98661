use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] lotbook_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Remote backend is not configured. Set LOTBOOK_API_URL and LOTBOOK_ANON_KEY, or pass --remote-config PATH."
    )]
    RemoteNotConfigured,
}
