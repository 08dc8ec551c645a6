//! SQLite-backed local mirror.

use crate::error::{SyncError, SyncResult};
use crate::mirror::{queued_tx_id, LocalMirror, MirrorWrite, PendingTransaction};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tidesync_protocol::{Origin, Record, SyncId, Transaction};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    model_type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS records_by_type ON records(model_type, id);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_id TEXT NOT NULL UNIQUE,
    body TEXT NOT NULL
);
";

const CURSOR_KEY: &str = "cursor";

type RecordRow = (String, String, String, String, String);

/// Mirror persisted in a SQLite database.
///
/// Records, the cursor (in `meta`) and the outbound queue live in one
/// database file, and every commit is one SQLite transaction.
pub struct SqliteMirror {
    conn: Mutex<Connection>,
}

impl SqliteMirror {
    /// Opens or creates a mirror at `path`.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Opens a mirror that lives only as long as this value.
    pub fn open_in_memory() -> SyncResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SyncResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LocalMirror for SqliteMirror {
    fn get_all(&self, model_type: &str) -> SyncResult<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, model_type, data, created_at, updated_at
             FROM records WHERE model_type = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![model_type], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<RecordRow>, _>>()?;

        rows.into_iter().map(record_from_row).collect()
    }

    fn get_by_id(&self, id: &str) -> SyncResult<Option<Record>> {
        let conn = self.conn.lock();
        let row: Option<RecordRow> = conn
            .query_row(
                "SELECT id, model_type, data, created_at, updated_at FROM records WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        row.map(record_from_row).transpose()
    }

    fn cursor(&self) -> SyncResult<Option<SyncId>> {
        let conn = self.conn.lock();
        read_cursor(&conn)
    }

    fn pending(&self, limit: usize) -> SyncResult<Vec<PendingTransaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT seq, body FROM outbox ORDER BY seq LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(seq, body)| {
                let mut transaction: Transaction = serde_json::from_str(&body)?;
                transaction.origin = Origin::Local;
                Ok(PendingTransaction {
                    seq: seq as u64,
                    transaction,
                })
            })
            .collect()
    }

    fn pending_count(&self) -> SyncResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn commit(&self, writes: Vec<MirrorWrite>) -> SyncResult<()> {
        let mut conn = self.conn.lock();
        let db = conn.transaction()?;
        let count = writes.len();

        for write in writes {
            match write {
                MirrorWrite::Clear => {
                    db.execute("DELETE FROM records", [])?;
                }
                MirrorWrite::Put(record) => {
                    db.execute(
                        "INSERT INTO records (id, model_type, data, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(id) DO UPDATE SET
                            model_type = excluded.model_type,
                            data = excluded.data,
                            created_at = excluded.created_at,
                            updated_at = excluded.updated_at",
                        params![
                            record.id,
                            record.model_type,
                            serde_json::to_string(&record.data)?,
                            record.created_at.to_rfc3339(),
                            record.updated_at.to_rfc3339(),
                        ],
                    )?;
                }
                MirrorWrite::Delete(id) => {
                    db.execute("DELETE FROM records WHERE id = ?1", params![id])?;
                }
                MirrorWrite::SetCursor(sync_id) => {
                    let next = read_cursor(&db)?.map_or(sync_id, |c| c.max(sync_id));
                    db.execute(
                        "INSERT INTO meta (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![CURSOR_KEY, next.to_string()],
                    )?;
                }
                MirrorWrite::Enqueue(tx) => {
                    let tx_id = queued_tx_id(&tx)?;
                    db.execute(
                        "INSERT INTO outbox (tx_id, body) VALUES (?1, ?2)",
                        params![tx_id, serde_json::to_string(&tx)?],
                    )?;
                }
                MirrorWrite::Dequeue(tx_id) => {
                    db.execute("DELETE FROM outbox WHERE tx_id = ?1", params![tx_id])?;
                }
            }
        }

        db.commit()?;
        debug!(writes = count, "mirror commit");
        Ok(())
    }
}

fn read_cursor(conn: &Connection) -> SyncResult<Option<SyncId>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![CURSOR_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value
        .map(|v| {
            v.parse::<SyncId>()
                .map_err(|_| SyncError::Storage(format!("bad cursor value {}", v)))
        })
        .transpose()
}

fn record_from_row(row: RecordRow) -> SyncResult<Record> {
    let (id, model_type, data, created_at, updated_at) = row;
    Ok(Record {
        id,
        model_type,
        data: serde_json::from_str(&data)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("bad timestamp {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: &str, title: &str) -> Record {
        Record::new(id, "Todo", json!({ "title": title }), Utc::now())
    }

    #[test]
    fn records_round_trip() {
        let mirror = SqliteMirror::open_in_memory().unwrap();
        mirror.put(record("b", "second")).unwrap();
        mirror.put(record("a", "first")).unwrap();

        let all = mirror.get_all("Todo").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].data, json!({"title": "first"}));
        assert!(mirror.get_all("Note").unwrap().is_empty());

        mirror.delete("a").unwrap();
        assert!(mirror.get_by_id("a").unwrap().is_none());
        assert!(mirror.get_by_id("b").unwrap().is_some());
    }

    #[test]
    fn cursor_and_queue_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let mirror = SqliteMirror::open(&path).unwrap();
            assert_eq!(mirror.cursor().unwrap(), None);
            let tx = Transaction::create("Todo", "a", json!({"title": "x"})).into_local("t1");
            mirror
                .commit(vec![
                    MirrorWrite::Put(record("a", "x")),
                    MirrorWrite::Enqueue(tx),
                    MirrorWrite::SetCursor(4),
                ])
                .unwrap();
        }

        let mirror = SqliteMirror::open(&path).unwrap();
        assert_eq!(mirror.cursor().unwrap(), Some(4));
        let pending = mirror.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].transaction.is_local());
        assert_eq!(pending[0].transaction.tx_id.as_deref(), Some("t1"));
        assert!(mirror.get_by_id("a").unwrap().is_some());
    }

    #[test]
    fn cursor_never_lowers() {
        let mirror = SqliteMirror::open_in_memory().unwrap();
        mirror.commit(vec![MirrorWrite::SetCursor(7)]).unwrap();
        mirror.commit(vec![MirrorWrite::SetCursor(2)]).unwrap();
        assert_eq!(mirror.cursor().unwrap(), Some(7));
    }

    #[test]
    fn queue_order_and_dequeue() {
        let mirror = SqliteMirror::open_in_memory().unwrap();
        for i in 0..4 {
            let tx = Transaction::create("Todo", format!("r{}", i), json!({})).into_local(format!("t{}", i));
            mirror.commit(vec![MirrorWrite::Enqueue(tx)]).unwrap();
        }
        mirror
            .commit(vec![MirrorWrite::Dequeue("t0".into()), MirrorWrite::Dequeue("t2".into())])
            .unwrap();

        let ids: Vec<_> = mirror
            .pending(10)
            .unwrap()
            .into_iter()
            .map(|p| p.transaction.record_id)
            .collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        assert_eq!(mirror.pending(1).unwrap().len(), 1);
        assert_eq!(mirror.pending_count().unwrap(), 2);
    }

    #[test]
    fn failed_commit_rolls_back() {
        let mirror = SqliteMirror::open_in_memory().unwrap();
        mirror.commit(vec![MirrorWrite::SetCursor(1)]).unwrap();

        let result = mirror.commit(vec![
            MirrorWrite::Clear,
            MirrorWrite::Put(record("z", "z")),
            MirrorWrite::SetCursor(10),
            MirrorWrite::Enqueue(Transaction::create("Todo", "z", json!({}))),
        ]);

        assert!(result.is_err());
        assert!(mirror.get_by_id("z").unwrap().is_none());
        assert_eq!(mirror.cursor().unwrap(), Some(1));
    }
}
