//! SQLite persistence for connection records

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zqlz_core::{
    ConnectionRecord, ConnectionUrl, DatabaseType, Result, SnapshotEntry, SyncMode, ZqlzError,
};

use crate::{RecordStore, StoreOp};

const RECORD_COLUMNS: &str = "id, name, connection_type, connection_string, sync_mode, \
     password_ever_configured, label, color, created_at, updated_at";

/// Record store backed by a single SQLite connection.
///
/// The connection sits behind a mutex, so there is exactly one writer per
/// transaction.
pub struct SqliteRecordStore {
    db_path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open the store at the default location in the user's config directory
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path().map_err(storage_error)?;
        Self::with_path(db_path)
    }

    /// Open the store at a specific path
    pub fn with_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Self::open(&db_path).map_err(storage_error)?;
        let store = Self {
            db_path: Some(db_path),
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open a store that lives only as long as this value (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory record store")
            .map_err(storage_error)?;
        let store = Self {
            db_path: None,
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("zqlz").join("sync.db"))
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn open(db_path: &Path) -> anyhow::Result<Connection> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        tracing::debug!(path = ?db_path, "opening record store");
        Connection::open(db_path)
            .with_context(|| format!("Failed to open record store at {:?}", db_path))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                connection_type TEXT NOT NULL,
                connection_string TEXT NOT NULL,
                sync_mode TEXT NOT NULL,
                password_ever_configured INTEGER NOT NULL DEFAULT 0,
                label TEXT,
                color TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to initialize record store schema")
        .map_err(storage_error)?;

        Ok(())
    }

    fn get_in(conn: &Connection, id: Uuid) -> anyhow::Result<Option<ConnectionRecord>> {
        let sql = format!("SELECT {} FROM connections WHERE id = ?1", RECORD_COLUMNS);
        conn.query_row(&sql, params![id.to_string()], record_from_row)
            .optional()
            .with_context(|| format!("Failed to load connection {}", id))
    }

    fn upsert_in(conn: &Connection, record: &ConnectionRecord) -> anyhow::Result<()> {
        ConnectionUrl::parse(&record.connection_string)?;

        conn.execute(
            "INSERT INTO connections (id, name, connection_type, connection_string, sync_mode,
                                      password_ever_configured, label, color, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                connection_type = excluded.connection_type,
                connection_string = excluded.connection_string,
                sync_mode = excluded.sync_mode,
                password_ever_configured = excluded.password_ever_configured,
                label = excluded.label,
                color = excluded.color,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                record.id.to_string(),
                record.name,
                record.connection_type.as_str(),
                record.connection_string,
                record.sync_mode.as_str(),
                record.password_ever_configured,
                record.label.as_deref(),
                record.color.as_deref(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to save connection {}", record.id))?;

        Ok(())
    }

    fn delete_in(conn: &Connection, id: Uuid) -> anyhow::Result<()> {
        let deleted = conn
            .execute(
                "DELETE FROM connections WHERE id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("Failed to delete connection {}", id))?;

        if deleted == 0 {
            return Err(ZqlzError::RecordNotFound(id).into());
        }
        Ok(())
    }

    fn apply_in(tx: &Transaction<'_>, op: StoreOp) -> anyhow::Result<()> {
        match op {
            StoreOp::Upsert(record) => Self::upsert_in(tx, &record),
            StoreOp::Update { id, changes } => {
                let mut record = Self::get_in(tx, id)?.ok_or(ZqlzError::RecordNotFound(id))?;
                record.apply_changes(&changes)?;
                Self::upsert_in(tx, &record)
            }
            StoreOp::Delete(id) => Self::delete_in(tx, id),
        }
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: Uuid) -> Result<Option<ConnectionRecord>> {
        let conn = self.conn.lock();
        Self::get_in(&conn, id).map_err(storage_error)
    }

    fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        let conn = self.conn.lock();
        Self::upsert_in(&conn, record).map_err(storage_error)
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        Self::delete_in(&conn, id).map_err(storage_error)
    }

    fn list_all(&self) -> Result<Vec<ConnectionRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM connections ORDER BY created_at ASC, id ASC",
            RECORD_COLUMNS
        );

        let load = || -> anyhow::Result<Vec<ConnectionRecord>> {
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        };

        load()
            .context("Failed to list connections")
            .map_err(storage_error)
    }

    fn snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        let conn = self.conn.lock();

        let load = || -> anyhow::Result<Vec<SnapshotEntry>> {
            let mut stmt = conn.prepare("SELECT id, updated_at FROM connections ORDER BY id")?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(SnapshotEntry {
                        id: parse_uuid(row, 0)?,
                        updated_at: parse_datetime(row, 1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        };

        load()
            .context("Failed to snapshot connections")
            .map_err(storage_error)
    }

    fn apply_batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut conn = self.conn.lock();
        let count = ops.len();

        let run = |conn: &mut Connection| -> anyhow::Result<()> {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            for op in ops {
                Self::apply_in(&tx, op)?;
            }
            tx.commit().context("Failed to commit transaction")?;
            Ok(())
        };

        run(&mut conn).map_err(storage_error)?;
        tracing::trace!(count, "applied store batch");
        Ok(())
    }

    fn modify(
        &self,
        id: Uuid,
        decide: Box<dyn FnOnce(Option<&ConnectionRecord>) -> Result<StoreOp> + '_>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();

        let run = |conn: &mut Connection| -> anyhow::Result<()> {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            let local = Self::get_in(&tx, id)?;
            let op = decide(local.as_ref())?;
            Self::apply_in(&tx, op)?;
            tx.commit().context("Failed to commit transaction")?;
            Ok(())
        };

        run(&mut conn).map_err(storage_error)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    let connection_type: String = row.get(2)?;
    let sync_mode: String = row.get(4)?;

    Ok(ConnectionRecord {
        id: parse_uuid(row, 0)?,
        name: row.get(1)?,
        connection_type: DatabaseType::parse(&connection_type).ok_or_else(|| {
            conversion_error(2, anyhow!("unknown connection type {:?}", connection_type))
        })?,
        connection_string: row.get(3)?,
        sync_mode: SyncMode::from_str(&sync_mode),
        password_ever_configured: row.get(5)?,
        label: row.get(6)?,
        color: row.get(7)?,
        created_at: parse_datetime(row, 8)?,
        updated_at: parse_datetime(row, 9)?,
    })
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e.into()))
}

fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.into()))
}

fn conversion_error(idx: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

/// Keep typed errors (such as `RecordNotFound`) intact, wrap everything else
fn storage_error(err: anyhow::Error) -> ZqlzError {
    match err.downcast::<ZqlzError>() {
        Ok(err) => err,
        Err(err) => ZqlzError::Storage(format!("{:#}", err)),
    }
}
