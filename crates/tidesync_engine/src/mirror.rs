//! Client-side store of synchronized records.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tidesync_protocol::{Origin, Record, SyncId, Transaction};

/// One write inside a grouped mirror commit.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorWrite {
    /// Removes every record. The cursor and the outbound queue are kept.
    Clear,
    /// Inserts or replaces a record.
    Put(Record),
    /// Removes a record by id.
    Delete(String),
    /// Raises the cursor. A lower value than the stored one is ignored.
    SetCursor(SyncId),
    /// Appends a local transaction to the outbound queue.
    Enqueue(Transaction),
    /// Removes a transaction from the outbound queue by txId.
    Dequeue(String),
}

/// A local transaction waiting to be acknowledged by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    /// Queue position; increases with every enqueue.
    pub seq: u64,
    /// The queued transaction, tagged local.
    pub transaction: Transaction,
}

/// Durable client-side storage consumed by the sync engine.
///
/// `commit` applies a group of writes all-or-nothing: after a crash the
/// records, the cursor and the outbound queue are either all from before
/// the commit or all from after it.
pub trait LocalMirror: Send + Sync + 'static {
    /// Returns every record of a model type, ordered by id.
    fn get_all(&self, model_type: &str) -> SyncResult<Vec<Record>>;

    /// Returns a record by id.
    fn get_by_id(&self, id: &str) -> SyncResult<Option<Record>>;

    /// Returns the last applied sync id, or `None` before the first bootstrap.
    fn cursor(&self) -> SyncResult<Option<SyncId>>;

    /// Returns up to `limit` queued transactions in `seq` order.
    fn pending(&self, limit: usize) -> SyncResult<Vec<PendingTransaction>>;

    /// Returns the number of queued transactions.
    fn pending_count(&self) -> SyncResult<usize>;

    /// Applies `writes` in order, atomically.
    fn commit(&self, writes: Vec<MirrorWrite>) -> SyncResult<()>;

    /// Inserts or replaces one record.
    fn put(&self, record: Record) -> SyncResult<()> {
        self.commit(vec![MirrorWrite::Put(record)])
    }

    /// Removes one record.
    fn delete(&self, id: &str) -> SyncResult<()> {
        self.commit(vec![MirrorWrite::Delete(id.to_string())])
    }
}

/// Returns the txId a queued transaction must carry.
pub(crate) fn queued_tx_id(tx: &Transaction) -> SyncResult<&str> {
    tx.tx_id
        .as_deref()
        .ok_or_else(|| SyncError::Storage(format!("cannot queue {} without a txId", tx.record_id)))
}

#[derive(Debug, Default)]
struct MirrorState {
    records: BTreeMap<String, Record>,
    cursor: Option<SyncId>,
    outbox: BTreeMap<u64, Transaction>,
    /// txId to queue position.
    queued: HashMap<String, u64>,
    next_seq: u64,
}

impl MirrorState {
    /// Fails if any write of the group cannot be applied on top of this state.
    fn check(&self, writes: &[MirrorWrite]) -> SyncResult<()> {
        let mut added: HashSet<&str> = HashSet::new();
        let mut removed: HashSet<&str> = HashSet::new();
        for write in writes {
            match write {
                MirrorWrite::Enqueue(tx) => {
                    let tx_id = queued_tx_id(tx)?;
                    let present = added.contains(tx_id)
                        || (self.queued.contains_key(tx_id) && !removed.contains(tx_id));
                    if present {
                        return Err(SyncError::Storage(format!("{} is already queued", tx_id)));
                    }
                    added.insert(tx_id);
                    removed.remove(tx_id);
                }
                MirrorWrite::Dequeue(tx_id) => {
                    added.remove(tx_id.as_str());
                    removed.insert(tx_id.as_str());
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Applies a write that passed [`check`](Self::check).
    fn apply(&mut self, write: MirrorWrite) {
        match write {
            MirrorWrite::Clear => self.records.clear(),
            MirrorWrite::Put(record) => {
                self.records.insert(record.id.clone(), record);
            }
            MirrorWrite::Delete(id) => {
                self.records.remove(&id);
            }
            MirrorWrite::SetCursor(sync_id) => {
                self.cursor = Some(self.cursor.map_or(sync_id, |c| c.max(sync_id)));
            }
            MirrorWrite::Enqueue(mut tx) => {
                let Some(tx_id) = tx.tx_id.clone() else {
                    return;
                };
                tx.origin = Origin::Local;
                self.next_seq += 1;
                self.queued.insert(tx_id, self.next_seq);
                self.outbox.insert(self.next_seq, tx);
            }
            MirrorWrite::Dequeue(tx_id) => {
                if let Some(seq) = self.queued.remove(&tx_id) {
                    self.outbox.remove(&seq);
                }
            }
        }
    }
}

/// In-memory mirror.
///
/// A commit checks the whole group first and then applies it in place, so
/// a refused group leaves the state untouched.
#[derive(Default)]
pub struct MemoryMirror {
    state: RwLock<MirrorState>,
}

impl MemoryMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if the mirror holds no records.
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

impl LocalMirror for MemoryMirror {
    fn get_all(&self, model_type: &str) -> SyncResult<Vec<Record>> {
        Ok(self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.model_type == model_type)
            .cloned()
            .collect())
    }

    fn get_by_id(&self, id: &str) -> SyncResult<Option<Record>> {
        Ok(self.state.read().records.get(id).cloned())
    }

    fn cursor(&self) -> SyncResult<Option<SyncId>> {
        Ok(self.state.read().cursor)
    }

    fn pending(&self, limit: usize) -> SyncResult<Vec<PendingTransaction>> {
        Ok(self
            .state
            .read()
            .outbox
            .iter()
            .take(limit)
            .map(|(seq, tx)| PendingTransaction {
                seq: *seq,
                transaction: tx.clone(),
            })
            .collect())
    }

    fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.state.read().outbox.len())
    }

    fn commit(&self, writes: Vec<MirrorWrite>) -> SyncResult<()> {
        let mut state = self.state.write();
        state.check(&writes)?;
        for write in writes {
            state.apply(write);
        }
        Ok(())
    }
}
