//! Local store repository implementation

use libsql::{Connection, Value};

use crate::error::{Error, Result};
use crate::models::{
    Conflict, ConflictWinner, Entity, IndexKey, IndexValue, MutationKind, PendingMutation, Table,
};
use crate::util::now_millis;

/// Metadata key holding the last successful pull (Unix ms)
pub const LAST_SYNC_TIME_KEY: &str = "lastSyncTime";

/// Trait for local cache storage operations (async)
#[allow(async_fn_in_trait)]
pub trait StoreRepository {
    /// Insert or replace an entity, clearing any tombstone
    async fn upsert<E: Entity>(&self, entity: &E) -> Result<()>;

    /// Get a live (non-tombstoned) entity by id
    async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>>;

    /// List all live entities of a table
    async fn get_all<E: Entity>(&self) -> Result<Vec<E>>;

    /// List live entities whose index column equals `value`
    async fn get_all_by_index<E: Entity>(
        &self,
        key: IndexKey,
        value: &IndexValue,
    ) -> Result<Vec<E>>;

    /// Tombstone an entity, stamping the deletion time; returns false when no live row matched
    async fn mark_deleted(&self, table: Table, id: &str, deleted_at: i64) -> Result<bool>;

    /// Set a photo's `synced` flag in both the index column and the stored record
    async fn mark_photo_synced(&self, photo_id: &str) -> Result<bool>;

    /// Physically remove an entity row
    async fn delete(&self, table: Table, id: &str) -> Result<()>;

    async fn put_blob(&self, photo_id: &str, bytes: &[u8]) -> Result<()>;
    async fn get_blob(&self, photo_id: &str) -> Result<Option<Vec<u8>>>;
    async fn has_blob(&self, photo_id: &str) -> Result<bool>;
    async fn delete_blob(&self, photo_id: &str) -> Result<()>;

    async fn enqueue_pending_mutation(&self, mutation: &PendingMutation) -> Result<()>;

    /// Unsynced mutations in enqueue order
    async fn list_pending_mutations(&self) -> Result<Vec<PendingMutation>>;

    async fn mark_mutation_synced(&self, id: &str) -> Result<()>;

    /// Delete mutations already confirmed by the remote
    async fn prune_synced_mutations(&self) -> Result<u64>;

    /// Drop a record's unsynced mutations without sending them
    async fn discard_pending_mutations(&self, table: Table, record_id: &str) -> Result<u64>;

    async fn record_conflict(
        &self,
        table: Table,
        record_id: &str,
        local_data: &serde_json::Value,
        cloud_data: &serde_json::Value,
        winner: ConflictWinner,
    ) -> Result<i64>;

    /// Whether an unresolved conflict exists for this record
    async fn has_unresolved_conflict(&self, table: Table, record_id: &str) -> Result<bool>;

    async fn list_unresolved_conflicts(&self) -> Result<Vec<Conflict>>;
    async fn resolve_conflict(&self, id: i64) -> Result<()>;

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    async fn get_metadata(&self, key: &str) -> Result<Option<String>>;

    /// Drop every row from every table, keeping the schema
    async fn clear_all(&self) -> Result<()>;
}

/// libSQL implementation of `StoreRepository`
pub struct LibSqlStoreRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlStoreRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_entities<E: Entity>(&self, sql: &str, params: Vec<Value>) -> Result<Vec<E>> {
        let mut rows = self
            .conn
            .query(sql, libsql::params_from_iter(params))
            .await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(0)?;
            entities.push(serde_json::from_str(&data)?);
        }
        Ok(entities)
    }

    fn parse_mutation(row: &libsql::Row) -> Result<PendingMutation> {
        let kind: String = row.get(1)?;
        let table: String = row.get(2)?;
        let data: String = row.get(4)?;
        Ok(PendingMutation {
            id: row.get(0)?,
            kind: kind.parse::<MutationKind>()?,
            table: table.parse()?,
            record_id: row.get(3)?,
            data: serde_json::from_str(&data)?,
            timestamp: row.get(5)?,
            synced: row.get::<i64>(6)? != 0,
        })
    }

    fn parse_conflict(row: &libsql::Row) -> Result<Conflict> {
        let table: String = row.get(1)?;
        let local_data: String = row.get(3)?;
        let cloud_data: String = row.get(4)?;
        let winner: String = row.get(5)?;
        Ok(Conflict {
            id: row.get(0)?,
            table: table.parse()?,
            record_id: row.get(2)?,
            local_data: serde_json::from_str(&local_data)?,
            cloud_data: serde_json::from_str(&cloud_data)?,
            winner: winner.parse()?,
            timestamp: row.get(6)?,
            resolved: row.get::<i64>(7)? != 0,
        })
    }
}

impl StoreRepository for LibSqlStoreRepository<'_> {
    async fn upsert<E: Entity>(&self, entity: &E) -> Result<()> {
        let table = E::TABLE;
        let keys = table.index_keys();
        let values = entity.index_values();
        if keys.len() != values.len() {
            return Err(Error::InvalidInput(format!(
                "{table} expects {} index values, got {}",
                keys.len(),
                values.len()
            )));
        }

        let columns: String = keys.iter().map(|key| format!(", {}", key.column())).collect();
        let placeholders: String = (0..keys.len()).map(|i| format!(", ?{}", i + 4)).collect();
        let updates: String = keys
            .iter()
            .map(|key| format!(", {0} = excluded.{0}", key.column()))
            .collect();
        let sql = format!(
            "INSERT INTO {table} (id, data, updated_at, deleted{columns})
             VALUES (?1, ?2, ?3, 0{placeholders})
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                deleted = 0{updates}"
        );

        let updated_at = entity
            .updated_at()
            .map_or(Value::Null, |ts| Value::Integer(ts.timestamp_millis()));
        let mut params = vec![
            Value::Text(entity.id().to_string()),
            Value::Text(serde_json::to_string(entity)?),
            updated_at,
        ];
        params.extend(values.iter().map(IndexValue::to_sql));

        self.conn
            .execute(&sql, libsql::params_from_iter(params))
            .await?;
        Ok(())
    }

    async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let sql = format!(
            "SELECT data FROM {} WHERE id = ?1 AND deleted = 0",
            E::TABLE
        );
        let mut entities = self
            .query_entities(&sql, vec![Value::Text(id.to_string())])
            .await?;
        Ok(entities.pop())
    }

    async fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        let sql = format!("SELECT data FROM {} WHERE deleted = 0 ORDER BY id", E::TABLE);
        self.query_entities(&sql, Vec::new()).await
    }

    async fn get_all_by_index<E: Entity>(
        &self,
        key: IndexKey,
        value: &IndexValue,
    ) -> Result<Vec<E>> {
        let table = E::TABLE;
        if !table.has_index(key) {
            return Err(Error::InvalidInput(format!(
                "{table} has no index on {}",
                key.column()
            )));
        }

        let column = key.column();
        if *value == IndexValue::Null {
            let sql = format!(
                "SELECT data FROM {table} WHERE {column} IS NULL AND deleted = 0 ORDER BY id"
            );
            return self.query_entities(&sql, Vec::new()).await;
        }

        let sql =
            format!("SELECT data FROM {table} WHERE {column} = ?1 AND deleted = 0 ORDER BY id");
        self.query_entities(&sql, vec![value.to_sql()]).await
    }

    async fn mark_deleted(&self, table: Table, id: &str, deleted_at: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {table} SET deleted = 1, updated_at = ?2 WHERE id = ?1 AND deleted = 0"
        );
        let rows = self
            .conn
            .execute(
                &sql,
                libsql::params_from_iter(vec![
                    Value::Text(id.to_string()),
                    Value::Integer(deleted_at),
                ]),
            )
            .await?;
        Ok(rows > 0)
    }

    async fn mark_photo_synced(&self, photo_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE photos
                 SET synced = 1, data = json_set(data, '$.synced', json('true'))
                 WHERE id = ?1 AND deleted = 0 AND synced = 0",
                [photo_id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {table} WHERE id = ?1");
        self.conn.execute(&sql, [id]).await?;
        Ok(())
    }

    async fn put_blob(&self, photo_id: &str, bytes: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO photo_blobs (photo_id, bytes, stored_at) VALUES (?1, ?2, ?3)",
                libsql::params_from_iter(vec![
                    Value::Text(photo_id.to_string()),
                    Value::Blob(bytes.to_vec()),
                    Value::Integer(now_millis()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn get_blob(&self, photo_id: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query("SELECT bytes FROM photo_blobs WHERE photo_id = ?1", [photo_id])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<Vec<u8>>(0)?))
        } else {
            Ok(None)
        }
    }

    async fn has_blob(&self, photo_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM photo_blobs WHERE photo_id = ?1)",
                [photo_id],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn delete_blob(&self, photo_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM photo_blobs WHERE photo_id = ?1", [photo_id])
            .await?;
        Ok(())
    }

    async fn enqueue_pending_mutation(&self, mutation: &PendingMutation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pending_sync (id, seq, kind, table_name, record_id, data, timestamp, synced)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_sync), ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params_from_iter(vec![
                    Value::Text(mutation.id.clone()),
                    Value::Text(mutation.kind.as_str().to_string()),
                    Value::Text(mutation.table.name().to_string()),
                    Value::Text(mutation.record_id.clone()),
                    Value::Text(serde_json::to_string(&mutation.data)?),
                    Value::Integer(mutation.timestamp),
                    Value::Integer(i64::from(mutation.synced)),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn list_pending_mutations(&self) -> Result<Vec<PendingMutation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, table_name, record_id, data, timestamp, synced
                 FROM pending_sync
                 WHERE synced = 0
                 ORDER BY seq ASC",
                (),
            )
            .await?;

        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    async fn mark_mutation_synced(&self, id: &str) -> Result<()> {
        let rows = self
            .conn
            .execute("UPDATE pending_sync SET synced = 1 WHERE id = ?1", [id])
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("pending mutation {id}")));
        }
        Ok(())
    }

    async fn prune_synced_mutations(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM pending_sync WHERE synced = 1", ())
            .await?;
        Ok(rows)
    }

    async fn discard_pending_mutations(&self, table: Table, record_id: &str) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM pending_sync WHERE table_name = ?1 AND record_id = ?2 AND synced = 0",
                [table.name(), record_id],
            )
            .await?;
        Ok(rows)
    }

    async fn record_conflict(
        &self,
        table: Table,
        record_id: &str,
        local_data: &serde_json::Value,
        cloud_data: &serde_json::Value,
        winner: ConflictWinner,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO conflicts (table_name, record_id, local_data, cloud_data, winner, timestamp, resolved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                libsql::params_from_iter(vec![
                    Value::Text(table.name().to_string()),
                    Value::Text(record_id.to_string()),
                    Value::Text(serde_json::to_string(local_data)?),
                    Value::Text(serde_json::to_string(cloud_data)?),
                    Value::Text(winner.as_str().to_string()),
                    Value::Integer(now_millis()),
                ]),
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn has_unresolved_conflict(&self, table: Table, record_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM conflicts
                    WHERE table_name = ?1 AND record_id = ?2 AND resolved = 0
                )",
                [table.name(), record_id],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn list_unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, record_id, local_data, cloud_data, winner, timestamp, resolved
                 FROM conflicts
                 WHERE resolved = 0
                 ORDER BY id ASC",
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn resolve_conflict(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE conflicts SET resolved = 1 WHERE id = ?1",
                libsql::params_from_iter(vec![Value::Integer(id)]),
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("conflict {id}")));
        }
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM metadata WHERE key = ?1", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let mut statements: Vec<String> = Table::ALL
            .iter()
            .map(|table| format!("DELETE FROM {table}"))
            .collect();
        statements.extend(
            ["photo_blobs", "pending_sync", "conflicts", "metadata"]
                .iter()
                .map(|name| format!("DELETE FROM {name}")),
        );

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for stmt in &statements {
            if let Err(e) = self.conn.execute(stmt.as_str(), ()).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }
}
