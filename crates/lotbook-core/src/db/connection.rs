//! libSQL connection for the local cache

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::Result;

/// Pragmas applied on every open. In-memory databases reject some of them.
const PRAGMAS: [&str; 3] = [
    "PRAGMA journal_mode = WAL;",
    "PRAGMA synchronous = NORMAL;",
    "PRAGMA temp_store = MEMORY;",
];

/// Open libSQL database plus its single connection, migrated to the current schema.
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open or create the cache file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(&path.as_ref().to_string_lossy()).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::build(":memory:").await
    }

    async fn build(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;
        for pragma in PRAGMAS {
            if let Err(error) = conn.execute(pragma, ()).await {
                tracing::debug!(pragma, %error, "Pragma not applied");
            }
        }
        migrations::run(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
