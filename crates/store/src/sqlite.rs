//! libSQL reference backends for the collaborator traits.
//!
//! [`SqliteRecordStore`] is the durable work queue, [`SqliteAnalyticsSink`]
//! the append-only audit table, and [`SqliteVectorIndex`] a local chunk
//! table standing in for the embedding/vector collaborator. All three can
//! share one database file; migrations are idempotent on open.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, Value, params};

use webharvest_shared::{
    AuditRow, ContentKind, HarvestError, RecordFilter, RecordPatch, RecordStatus, Result,
    UrlRecord,
};

use crate::{AnalyticsSink, IndexDocument, RecordStore, VectorIndex, migrations};

/// Open a database at `path` and bring its schema up to date.
async fn open_database(path: &Path) -> Result<(Database, Connection)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }

    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    let conn = db
        .connect()
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    run_migrations(&conn).await?;
    Ok((db, conn))
}

/// Run pending schema migrations.
async fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = schema_version(conn).await;

    for migration in migrations::all_migrations() {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                HarvestError::Storage(format!("migration v{} failed: {e}", migration.version))
            })?;
        }
    }
    Ok(())
}

/// Get the current schema version, or 0 if no migrations have been applied.
async fn schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => {
            if let Ok(Some(row)) = rows.next().await {
                row.get::<u32>(0).unwrap_or(0)
            } else {
                0
            }
        }
        Err(_) => 0, // Table doesn't exist yet
    }
}

// ---------------------------------------------------------------------------
// SqliteRecordStore
// ---------------------------------------------------------------------------

/// Work-queue backend over a local libSQL database.
pub struct SqliteRecordStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open or create the record database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let (db, conn) = open_database(path).await?;
        Ok(Self { db, conn })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert_discovered(&self, record: &UrlRecord) -> Result<()> {
        // On rediscovery only the touch metadata moves; status, artifact,
        // and counters stay exactly as the last stage left them.
        self.conn
            .execute(
                "INSERT INTO records
                   (id, url, status, run_id, content_kind, artifact_ref,
                    char_count, skip_reason, discovered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                   run_id = excluded.run_id,
                   updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    record.url.as_str(),
                    record.status.as_str(),
                    record.run_id.as_str(),
                    record.content_kind.as_str(),
                    record.artifact_ref.as_deref(),
                    record.char_count as i64,
                    record.skip_reason.as_deref(),
                    record.discovered_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<UrlRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, status, run_id, content_kind, artifact_ref,
                        char_count, skip_reason, discovered_at, updated_at
                 FROM records WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    async fn apply(&self, id: &str, patch: &RecordPatch) -> Result<()> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| HarvestError::Storage(format!("record not found: {id}")))?;

        if !current.status.can_transition(patch.status) {
            return Err(HarvestError::InvalidTransition {
                from: current.status,
                to: patch.status,
            });
        }

        self.conn
            .execute(
                "UPDATE records SET
                   status = ?1,
                   content_kind = ?2,
                   artifact_ref = ?3,
                   char_count = ?4,
                   skip_reason = ?5,
                   run_id = ?6,
                   updated_at = ?7
                 WHERE id = ?8",
                params![
                    patch.status.as_str(),
                    patch.content_kind.as_str(),
                    patch.artifact_ref.as_deref(),
                    patch.char_count as i64,
                    patch.skip_reason.as_deref(),
                    patch.run_id.as_str(),
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<UrlRecord>> {
        let mut sql = String::from(
            "SELECT id, url, status, run_id, content_kind, artifact_ref,
                    char_count, skip_reason, discovered_at, updated_at
             FROM records WHERE 1=1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", values.len() + 1));
            values.push(Value::from(status.as_str().to_string()));
        }
        if let Some(kind) = filter.content_kind {
            sql.push_str(&format!(" AND content_kind = ?{}", values.len() + 1));
            values.push(Value::from(kind.as_str().to_string()));
        }
        if filter.require_artifact {
            sql.push_str(" AND artifact_ref IS NOT NULL AND artifact_ref != ''");
        }

        sql.push_str(" ORDER BY discovered_at, rowid");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT ?{}", values.len() + 1));
            values.push(Value::from(limit as i64));
        }

        let mut rows = self
            .conn
            .query(&sql, values)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    async fn reset(&self, target: RecordStatus) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE records SET status = ?1, updated_at = ?2 WHERE status != ?1",
                params![target.as_str(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(changed)
    }
}

/// Convert a database row to a [`UrlRecord`].
fn row_to_record(row: &libsql::Row) -> Result<UrlRecord> {
    let status_str: String = row
        .get(2)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    let kind_str: String = row
        .get(4)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    Ok(UrlRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        url: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        status: RecordStatus::parse(&status_str)
            .ok_or_else(|| HarvestError::Storage(format!("unknown status: {status_str}")))?,
        run_id: row
            .get::<String>(3)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        content_kind: ContentKind::parse(&kind_str)
            .ok_or_else(|| HarvestError::Storage(format!("unknown content kind: {kind_str}")))?,
        artifact_ref: row.get::<String>(5).ok().filter(|s| !s.is_empty()),
        char_count: row.get::<i64>(6).unwrap_or(0) as u64,
        skip_reason: row.get::<String>(7).ok().filter(|s| !s.is_empty()),
        discovered_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| HarvestError::Storage(format!("invalid timestamp: {e}")))
}

// ---------------------------------------------------------------------------
// SqliteAnalyticsSink
// ---------------------------------------------------------------------------

/// Append-only audit table in a local libSQL database.
///
/// The table is created on open if it does not exist, named by the
/// configured table id.
pub struct SqliteAnalyticsSink {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    table: String,
}

impl SqliteAnalyticsSink {
    /// Open or create the audit table `table` in the database at `path`.
    pub async fn open(path: &Path, table: &str) -> Result<Self> {
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || table.is_empty()
        {
            return Err(HarvestError::config(format!(
                "invalid audit table name: {table:?}"
            )));
        }

        let (db, conn) = open_database(path).await?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id       TEXT NOT NULL,
                url          TEXT NOT NULL,
                is_text      INTEGER NOT NULL,
                char_count   INTEGER NOT NULL,
                skip_reason  TEXT,
                artifact_ref TEXT,
                content_kind TEXT NOT NULL,
                recorded_at  TEXT NOT NULL
            );"
        ))
        .await
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl AnalyticsSink for SqliteAnalyticsSink {
    async fn append(&self, row: &AuditRow) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}
                       (run_id, url, is_text, char_count, skip_reason,
                        artifact_ref, content_kind, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    self.table
                ),
                params![
                    row.run_id.as_str(),
                    row.url.as_str(),
                    row.is_text as i64,
                    row.char_count as i64,
                    row.skip_reason.as_deref(),
                    row.artifact_ref.as_deref(),
                    row.content_kind.as_str(),
                    row.recorded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteVectorIndex
// ---------------------------------------------------------------------------

/// Local stand-in for the embedding/vector collaborator: chunk rows in a
/// libSQL table, one collection per logical index. Embedding happens in the
/// real collaborator; this backend exists so the pipeline runs end-to-end
/// without one.
pub struct SqliteVectorIndex {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl SqliteVectorIndex {
    /// Open or create the chunk database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let (db, conn) = open_database(path).await?;
        Ok(Self { db, conn })
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn index(&self, documents: &[IndexDocument], collection: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for doc in documents {
            self.conn
                .execute(
                    "INSERT INTO chunks (collection, source_url, seq, body, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        collection,
                        doc.source_url.as_str(),
                        doc.seq as i64,
                        doc.body.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(|e| HarvestError::Index(e.to_string()))?;
        }
        Ok(())
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        // Writes are durable per statement here; the flush is a commit
        // point for backends that buffer.
        tracing::debug!(collection, "flush");
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(|e| HarvestError::Index(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(HarvestError::Index(e.to_string())),
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM chunks WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(|e| HarvestError::Index(e.to_string()))?;
        Ok(())
    }
}
