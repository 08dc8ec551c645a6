//! SQLite-backed transaction log.

use crate::error::{ServerError, ServerResult};
use crate::oplog::{check_batch, TransactionLog};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use tidesync_protocol::{Action, LogEntry, Record, SyncId, Transaction};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sync_log (
    sync_id INTEGER PRIMARY KEY,
    tx_id TEXT UNIQUE,
    model_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    action TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS model_data (
    id TEXT PRIMARY KEY,
    model_type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS model_data_by_type ON model_data(model_type, id);
";

type LogRow = (i64, Option<String>, String, String, String, String);
type RecordRow = (String, String, String, String, String);

/// Transaction log persisted in a SQLite database.
///
/// `sync_log` holds one row per admitted transaction and `model_data` the
/// materialized state. Each append runs in a single `BEGIN IMMEDIATE`
/// transaction, and the next id is computed inside it, so a rolled-back
/// append never consumes an id.
pub struct SqliteTransactionLog {
    conn: Mutex<Connection>,
}

impl SqliteTransactionLog {
    /// Opens or creates a log at `path`.
    pub fn open(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let log = Self::init(conn)?;
        info!(path = %path.display(), latest = log.latest()?, "opened transaction log");
        Ok(log)
    }

    /// Opens a log that lives only as long as this value.
    pub fn open_in_memory() -> ServerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ServerResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the number of log entries.
    pub fn len(&self) -> ServerResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns true if the log has no entries.
    pub fn is_empty(&self) -> ServerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Recomputes `model_data` from `sync_log`.
    ///
    /// Returns the number of records after the rebuild. Timestamps of
    /// rebuilt records are reset to the rebuild time.
    pub fn rebuild_materialized(&self) -> ServerResult<usize> {
        let mut conn = self.conn.lock();
        let db = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut builder = SnapshotBuilder::new();
        for entry in read_entries(&db, 1, SyncId::MAX)? {
            builder.apply(&entry);
        }
        let snapshot = builder.finish();

        db.execute("DELETE FROM model_data", [])?;
        for record in snapshot.models.values().flatten() {
            db.execute(
                "INSERT INTO model_data (id, model_type, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.model_type,
                    serde_json::to_string(&record.data)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
        }
        db.commit()?;

        let count = snapshot.record_count();
        info!(records = count, sync_id = snapshot.sync_id, "rebuilt materialized state");
        Ok(count)
    }
}

impl TransactionLog for SqliteTransactionLog {
    fn append(&self, transactions: Vec<Transaction>) -> ServerResult<SyncId> {
        check_batch(&transactions)?;

        let mut conn = self.conn.lock();
        let db = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut next = latest_id(&db)? + 1;
        let now = Utc::now().to_rfc3339();
        let mut last = 0;

        for tx in &transactions {
            if let Some(tx_id) = &tx.tx_id {
                let existing: Option<i64> = db
                    .query_row(
                        "SELECT sync_id FROM sync_log WHERE tx_id = ?1",
                        params![tx_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(sync_id) = existing {
                    last = sync_id as SyncId;
                    continue;
                }
            }

            let data = serde_json::to_string(&tx.data)?;
            db.execute(
                "INSERT INTO sync_log (sync_id, tx_id, model_type, record_id, action, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    next as i64,
                    tx.tx_id,
                    tx.model_type,
                    tx.record_id,
                    tx.action.as_str(),
                    data
                ],
            )?;
            apply_materialized(&db, tx, &data, &now)?;

            last = next;
            next += 1;
        }

        db.commit()?;
        debug!(last, "appended batch");
        Ok(last)
    }

    fn query_with_latest(
        &self,
        from: SyncId,
        to: Option<SyncId>,
    ) -> ServerResult<(Vec<LogEntry>, SyncId)> {
        let mut conn = self.conn.lock();
        let db = conn.transaction()?;
        let entries = read_entries(&db, from.max(1), to.unwrap_or(SyncId::MAX))?;
        let latest = latest_id(&db)?;
        db.commit()?;
        Ok((entries, latest))
    }

    fn snapshot(&self) -> ServerResult<Snapshot> {
        let mut conn = self.conn.lock();
        let db = conn.transaction()?;
        let sync_id = latest_id(&db)?;

        let rows = {
            let mut stmt = db.prepare(
                "SELECT id, model_type, data, created_at, updated_at
                 FROM model_data ORDER BY model_type, id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<RecordRow>, _>>()?;
            rows
        };
        db.commit()?;

        let records = rows
            .into_iter()
            .map(record_from_row)
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(Snapshot::from_records(sync_id, records))
    }

    fn latest(&self) -> ServerResult<SyncId> {
        let conn = self.conn.lock();
        latest_id(&conn)
    }
}

fn latest_id(conn: &Connection) -> ServerResult<SyncId> {
    let latest: i64 = conn.query_row("SELECT COALESCE(MAX(sync_id), 0) FROM sync_log", [], |row| {
        row.get(0)
    })?;
    Ok(latest as SyncId)
}

fn apply_materialized(
    conn: &Connection,
    tx: &Transaction,
    data: &str,
    now: &str,
) -> ServerResult<()> {
    if tx.action.is_upsert() {
        conn.execute(
            "INSERT INTO model_data (id, model_type, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                model_type = excluded.model_type,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![tx.record_id, tx.model_type, data, now],
        )?;
    } else {
        conn.execute("DELETE FROM model_data WHERE id = ?1", params![tx.record_id])?;
    }
    Ok(())
}

fn read_entries(conn: &Connection, from: SyncId, to: SyncId) -> ServerResult<Vec<LogEntry>> {
    let to = to.min(i64::MAX as SyncId);
    let mut stmt = conn.prepare(
        "SELECT sync_id, tx_id, model_type, record_id, action, data
         FROM sync_log WHERE sync_id >= ?1 AND sync_id <= ?2 ORDER BY sync_id",
    )?;
    let rows = stmt
        .query_map(params![from as i64, to as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<Result<Vec<LogRow>, _>>()?;

    rows.into_iter().map(entry_from_row).collect()
}

fn entry_from_row(row: LogRow) -> ServerResult<LogEntry> {
    let (sync_id, tx_id, model_type, record_id, action, data) = row;
    let action: Action = action
        .parse()
        .map_err(|_| ServerError::Storage(format!("entry {} has unknown action {}", sync_id, action)))?;
    let mut tx = Transaction::new(model_type, record_id, action, serde_json::from_str(&data)?);
    tx.tx_id = tx_id;
    Ok(LogEntry::new(sync_id as SyncId, tx))
}

fn record_from_row(row: RecordRow) -> ServerResult<Record> {
    let (id, model_type, data, created_at, updated_at) = row;
    Ok(Record {
        id,
        model_type,
        data: serde_json::from_str(&data)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> ServerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ServerError::Storage(format!("bad timestamp {}: {}", value, e)))
}
