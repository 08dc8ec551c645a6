//! Server-side transaction log.

use crate::error::{ServerError, ServerResult};
use crate::snapshot::Snapshot;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tidesync_protocol::{LogEntry, Record, SyncId, Transaction};
use tracing::debug;

/// Append-only, gapless log of admitted transactions.
///
/// Implementations must make "allocate the next sync id" and "persist the
/// entry" one atomic step for concurrent callers, and must keep the
/// materialized record state in step with the log.
pub trait TransactionLog: Send + Sync {
    /// Admits a batch, assigning each new element its own sync id in order.
    ///
    /// Returns the sync id of the last element. If any element is invalid,
    /// nothing is admitted. Elements whose `txId` was already admitted keep
    /// their original sync id and are not appended again.
    fn append(&self, transactions: Vec<Transaction>) -> ServerResult<SyncId>;

    /// Returns entries with `from <= sync_id <= to`, ascending.
    fn query(&self, from: SyncId, to: Option<SyncId>) -> ServerResult<Vec<LogEntry>> {
        self.query_with_latest(from, to).map(|(entries, _)| entries)
    }

    /// Like [`query`](Self::query), together with the highest assigned sync
    /// id read from the same state of the log.
    fn query_with_latest(
        &self,
        from: SyncId,
        to: Option<SyncId>,
    ) -> ServerResult<(Vec<LogEntry>, SyncId)>;

    /// Returns the materialized state together with the sync id it reflects.
    fn snapshot(&self) -> ServerResult<Snapshot>;

    /// Returns the highest assigned sync id, or 0 for an empty log.
    fn latest(&self) -> ServerResult<SyncId>;
}

impl<L: TransactionLog + ?Sized> TransactionLog for Arc<L> {
    fn append(&self, transactions: Vec<Transaction>) -> ServerResult<SyncId> {
        (**self).append(transactions)
    }

    fn query_with_latest(
        &self,
        from: SyncId,
        to: Option<SyncId>,
    ) -> ServerResult<(Vec<LogEntry>, SyncId)> {
        (**self).query_with_latest(from, to)
    }

    fn snapshot(&self) -> ServerResult<Snapshot> {
        (**self).snapshot()
    }

    fn latest(&self) -> ServerResult<SyncId> {
        (**self).latest()
    }
}

/// Rejects empty batches and batches with any malformed element.
pub(crate) fn check_batch(transactions: &[Transaction]) -> ServerResult<()> {
    if transactions.is_empty() {
        return Err(ServerError::Validation("invalid transaction: empty batch".into()));
    }
    for (index, tx) in transactions.iter().enumerate() {
        tx.validate().map_err(|e| {
            ServerError::Validation(format!("transaction {}: {}", index, e))
        })?;
    }
    Ok(())
}

#[derive(Default)]
struct LogState {
    /// Entry `n` lives at index `n - 1`.
    entries: Vec<LogEntry>,
    /// Current record state keyed by record id.
    records: BTreeMap<String, Record>,
    /// Admitted txIds.
    admitted: HashMap<String, SyncId>,
}

/// In-memory transaction log.
///
/// One lock covers the entries, the materialized state and the txId index,
/// so readers always see a fully applied batch.
#[derive(Default)]
pub struct MemoryTransactionLog {
    state: RwLock<LogState>,
}

impl MemoryTransactionLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn append(&self, transactions: Vec<Transaction>) -> ServerResult<SyncId> {
        check_batch(&transactions)?;

        let mut state = self.state.write();
        let now = Utc::now();
        let mut last = 0;

        for tx in transactions {
            if let Some(existing) = tx.tx_id.as_ref().and_then(|id| state.admitted.get(id)) {
                last = *existing;
                continue;
            }

            let sync_id = state.entries.len() as SyncId + 1;
            match Record::upserted(&tx, state.records.get(&tx.record_id), now) {
                Some(record) => {
                    state.records.insert(record.id.clone(), record);
                }
                None => {
                    state.records.remove(&tx.record_id);
                }
            }
            if let Some(tx_id) = &tx.tx_id {
                state.admitted.insert(tx_id.clone(), sync_id);
            }
            state.entries.push(LogEntry::new(sync_id, tx));
            last = sync_id;
        }

        debug!(last, total = state.entries.len(), "appended batch");
        Ok(last)
    }

    fn query_with_latest(
        &self,
        from: SyncId,
        to: Option<SyncId>,
    ) -> ServerResult<(Vec<LogEntry>, SyncId)> {
        let state = self.state.read();
        let latest = state.entries.len() as SyncId;
        let from = from.max(1);
        let to = to.unwrap_or(latest).min(latest);
        if from > to {
            return Ok((Vec::new(), latest));
        }
        Ok((state.entries[(from - 1) as usize..to as usize].to_vec(), latest))
    }

    fn snapshot(&self) -> ServerResult<Snapshot> {
        let state = self.state.read();
        Ok(Snapshot::from_records(
            state.entries.len() as SyncId,
            state.records.values().cloned(),
        ))
    }

    fn latest(&self) -> ServerResult<SyncId> {
        Ok(self.state.read().entries.len() as SyncId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotBuilder;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::thread;

    fn todo(id: &str, title: &str) -> Transaction {
        Transaction::create("Todo", id, json!({ "title": title }))
    }

    #[test]
    fn empty_log() {
        let log = MemoryTransactionLog::new();
        assert_eq!(log.latest().unwrap(), 0);
        assert!(log.is_empty());
        assert!(log.query(1, None).unwrap().is_empty());
        assert_eq!(log.snapshot().unwrap().sync_id, 0);
    }

    #[test]
    fn batch_ids_are_per_element() {
        let log = MemoryTransactionLog::new();
        assert_eq!(log.append(vec![todo("a", "1")]).unwrap(), 1);
        assert_eq!(log.append(vec![todo("b", "2"), todo("c", "3"), todo("d", "4")]).unwrap(), 4);

        let ids: Vec<_> = log.query(1, None).unwrap().iter().map(|e| e.sync_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(log.query(2, None).unwrap()[0].record_id(), "b");
    }

    #[test]
    fn invalid_batch_admits_nothing() {
        let log = MemoryTransactionLog::new();
        log.append(vec![todo("a", "1")]).unwrap();

        let bad = Transaction::update("Todo", "", json!({}));
        let result = log.append(vec![todo("b", "2"), bad]);
        assert!(matches!(result, Err(ServerError::Validation(_))));
        assert_eq!(log.latest().unwrap(), 1);
        assert_eq!(log.snapshot().unwrap().record_count(), 1);

        assert!(log.append(Vec::new()).is_err());
    }

    #[test]
    fn query_ranges() {
        let log = MemoryTransactionLog::new();
        let batch: Vec<_> = (0..5).map(|i| todo(&format!("t{}", i), "x")).collect();
        log.append(batch).unwrap();

        assert_eq!(log.query(2, Some(3)).unwrap().len(), 2);
        assert_eq!(log.query(0, Some(1)).unwrap().len(), 1);
        assert_eq!(log.query(4, Some(100)).unwrap().len(), 2);
        assert!(log.query(6, None).unwrap().is_empty());
        assert!(log.query(3, Some(2)).unwrap().is_empty());

        let (entries, latest) = log.query_with_latest(6, Some(9)).unwrap();
        assert!(entries.is_empty());
        assert_eq!(latest, 5);
    }

    #[test]
    fn duplicate_tx_id_keeps_original_sync_id() {
        let log = MemoryTransactionLog::new();
        let tx = todo("a", "1").with_tx_id("tx-a");

        assert_eq!(log.append(vec![tx.clone()]).unwrap(), 1);
        log.append(vec![todo("b", "2")]).unwrap();
        assert_eq!(log.append(vec![tx.clone()]).unwrap(), 1);
        assert_eq!(log.latest().unwrap(), 2);

        let retry = vec![tx, todo("c", "3").with_tx_id("tx-c")];
        assert_eq!(log.append(retry).unwrap(), 3);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn delete_removes_materialized_record() {
        let log = MemoryTransactionLog::new();
        log.append(vec![todo("a", "1")]).unwrap();
        log.append(vec![Transaction::delete("Todo", "a")]).unwrap();

        let snapshot = log.snapshot().unwrap();
        assert_eq!(snapshot.sync_id, 2);
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn update_keeps_created_at() {
        let log = MemoryTransactionLog::new();
        log.append(vec![todo("a", "1")]).unwrap();
        let created = log.snapshot().unwrap().models["Todo"][0].created_at;

        log.append(vec![Transaction::update("Todo", "a", json!({"title": "2"}))])
            .unwrap();
        let record = log.snapshot().unwrap().models["Todo"][0].clone();
        assert_eq!(record.created_at, created);
        assert_eq!(record.data, json!({"title": "2"}));
    }

    #[test]
    fn concurrent_appends_are_gapless() {
        let log = Arc::new(MemoryTransactionLog::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..25 {
                        let id = log
                            .append(vec![todo(&format!("{}-{}", t, i), "x")])
                            .unwrap();
                        assert!(id > last);
                        last = id;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ids: BTreeSet<_> = log.query(1, None).unwrap().iter().map(|e| e.sync_id).collect();
        assert_eq!(ids, (1..=200).collect::<BTreeSet<_>>());
    }

    fn arb_tx() -> impl Strategy<Value = Transaction> {
        (0..3usize, 0..6u8, any::<u16>()).prop_map(|(kind, id, n)| {
            let id = format!("r{}", id);
            match kind {
                0 => Transaction::create("Todo", id, json!({ "n": n })),
                1 => Transaction::update("Note", id, json!({ "n": n })),
                _ => Transaction::delete("Todo", id),
            }
        })
    }

    proptest! {
        #[test]
        fn snapshot_equals_fold(batches in prop::collection::vec(prop::collection::vec(arb_tx(), 1..4), 1..10)) {
            let log = MemoryTransactionLog::new();
            let mut previous = 0;
            for batch in batches {
                let last = log.append(batch).unwrap();
                prop_assert!(last > previous);
                previous = last;
            }

            let mut builder = SnapshotBuilder::new();
            for entry in log.query(1, None).unwrap() {
                builder.apply(&entry);
            }

            let folded = builder.finish().to_response();
            let served = log.snapshot().unwrap().to_response();
            prop_assert_eq!(folded, served);
        }
    }
}
