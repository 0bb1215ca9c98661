//! Database migrations

use crate::error::{Error, Result};
use crate::models::{IndexKey, Table};
use libsql::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
///
/// A database written by a newer build is refused rather than downgraded.
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version > CURRENT_VERSION {
        return Err(Error::Storage(format!(
            "local cache schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }
    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
pub async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

const fn column_type(key: IndexKey) -> &'static str {
    match key {
        IndexKey::IsPrimary | IndexKey::Synced => "INTEGER",
        IndexKey::CompanyId
        | IndexKey::SaleId
        | IndexKey::LotId
        | IndexKey::Status => "TEXT",
    }
}

fn entity_table_statements(table: Table) -> Vec<String> {
    let name = table.name();
    let index_columns: String = table
        .index_keys()
        .iter()
        .map(|key| format!(",\n            {} {}", key.column(), column_type(*key)))
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at INTEGER,
            deleted INTEGER NOT NULL DEFAULT 0{index_columns}
        )"
    )];
    statements.extend(table.index_keys().iter().map(|key| {
        let column = key.column();
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_{column} ON {name}({column})")
    }));
    statements
}

/// Migration to version 1: entity tables, blobs and metadata
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements = vec!["CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
    .to_string()];

    for table in Table::ALL {
        statements.extend(entity_table_statements(table));
    }

    statements.extend([
        "CREATE TABLE IF NOT EXISTS photo_blobs (
            photo_id TEXT PRIMARY KEY,
            bytes BLOB NOT NULL,
            stored_at INTEGER NOT NULL
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"
        .to_string(),
        "INSERT INTO schema_version (version) VALUES (1)".to_string(),
    ]);

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated local cache to version 1");
    Ok(())
}

/// Migration to version 2: pending mutation queue and conflict log
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS pending_sync (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            data TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_pending_sync_synced ON pending_sync(synced)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_pending_sync_record ON pending_sync(table_name, record_id)"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_data TEXT NOT NULL,
            cloud_data TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_conflicts_resolved ON conflicts(resolved)".to_string(),
        "INSERT INTO schema_version (version) VALUES (2)".to_string(),
    ];

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated local cache to version 2");
    Ok(())
}

/// Migration to version 3: record which side won each conflict
async fn migrate_v3(conn: &Connection) -> Result<()> {
    let statements = [
        "ALTER TABLE conflicts ADD COLUMN winner TEXT NOT NULL DEFAULT 'remote'".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_conflicts_record ON conflicts(table_name, record_id)"
            .to_string(),
        "INSERT INTO schema_version (version) VALUES (3)".to_string(),
    ];

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated local cache to version 3");
    Ok(())
}

async fn run_in_transaction(conn: &Connection, statements: &[String]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt.as_str(), ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}
