//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tidesync_protocol::{
    BootstrapResponse, LogEntry, ModelRecord, PullResponse, SyncId, Transaction,
};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, in-process, mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    /// Pushes a batch of local transactions, returning the sync id of the last one.
    async fn push(&self, transactions: &[Transaction]) -> SyncResult<SyncId>;

    /// Fetches log entries with `from <= sync_id <= to`.
    async fn pull(&self, from: SyncId, to: Option<SyncId>) -> SyncResult<PullResponse>;

    /// Fetches the current snapshot.
    async fn bootstrap(&self) -> SyncResult<BootstrapResponse>;
}

#[derive(Default)]
struct MockLog {
    entries: Vec<LogEntry>,
    admitted: HashMap<String, SyncId>,
    hidden: BTreeSet<SyncId>,
}

impl MockLog {
    fn append(&mut self, transactions: &[Transaction]) -> SyncId {
        let mut last = 0;
        for tx in transactions {
            if let Some(existing) = tx.tx_id.as_ref().and_then(|id| self.admitted.get(id)) {
                last = *existing;
                continue;
            }
            let sync_id = self.entries.len() as SyncId + 1;
            if let Some(tx_id) = &tx.tx_id {
                self.admitted.insert(tx_id.clone(), sync_id);
            }
            let mut stored = tx.clone();
            stored.origin = Default::default();
            self.entries.push(LogEntry::new(sync_id, stored));
            last = sync_id;
        }
        last
    }
}

/// A mock transport for testing.
///
/// Simulates a server log in memory. Knobs allow tests to drop the
/// connection, slow every call down, fail or reject pushes, cap the push
/// size, reorder or duplicate pull pages and withhold individual entries.
#[derive(Default)]
pub struct MockTransport {
    log: Mutex<MockLog>,
    disconnected: AtomicBool,
    failing_pushes: AtomicUsize,
    rejected_records: Mutex<HashMap<String, String>>,
    max_batch: AtomicUsize,
    latency: Mutex<Duration>,
    reverse_pages: AtomicBool,
    duplicate_pages: AtomicBool,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    bootstrap_calls: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connected state. A disconnected mock fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Makes the next `count` pushes fail with a retryable server error.
    pub fn fail_next_pushes(&self, count: usize) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    /// Rejects every push that carries a write to `record_id`.
    pub fn reject_record(&self, record_id: impl Into<String>, message: impl Into<String>) {
        self.rejected_records
            .lock()
            .insert(record_id.into(), message.into());
    }

    /// Refuses pushes of more than `max` transactions. 0 removes the cap.
    pub fn set_max_batch(&self, max: usize) {
        self.max_batch.store(max, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns pull pages in descending sync id order.
    pub fn set_reverse_pages(&self, reverse: bool) {
        self.reverse_pages.store(reverse, Ordering::SeqCst);
    }

    /// Returns every entry of a pull page twice.
    pub fn set_duplicate_pages(&self, duplicate: bool) {
        self.duplicate_pages.store(duplicate, Ordering::SeqCst);
    }

    /// Withholds an entry from pull responses.
    pub fn hide(&self, sync_id: SyncId) {
        self.log.lock().hidden.insert(sync_id);
    }

    /// Stops withholding an entry.
    pub fn unhide(&self, sync_id: SyncId) {
        self.log.lock().hidden.remove(&sync_id);
    }

    /// Appends transactions as if another client pushed them.
    pub fn inject(&self, transactions: Vec<Transaction>) -> SyncId {
        self.log.lock().append(&transactions)
    }

    /// Returns a copy of the simulated server log.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.lock().entries.clone()
    }

    /// Returns the number of push calls made.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of pull calls made.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of bootstrap calls made.
    pub fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    async fn check_connected(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.disconnected.load(Ordering::SeqCst) {
            Err(SyncError::transport_retryable("not connected"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn push(&self, transactions: &[Transaction]) -> SyncResult<SyncId> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected().await?;

        let max = self.max_batch.load(Ordering::SeqCst);
        if max > 0 && transactions.len() > max {
            return Err(SyncError::BatchTooLarge(format!(
                "too many transactions: {} > {}",
                transactions.len(),
                max
            )));
        }
        {
            let rejected = self.rejected_records.lock();
            if let Some(message) = transactions.iter().find_map(|t| rejected.get(&t.record_id)) {
                return Err(SyncError::Rejected(message.clone()));
            }
        }
        let failing = self.failing_pushes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pushes.store(failing - 1, Ordering::SeqCst);
            return Err(SyncError::ServerError("simulated failure".into()));
        }
        if transactions.is_empty() {
            return Err(SyncError::Rejected("empty batch".into()));
        }

        Ok(self.log.lock().append(transactions))
    }

    async fn pull(&self, from: SyncId, to: Option<SyncId>) -> SyncResult<PullResponse> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected().await?;

        let log = self.log.lock();
        let latest = log.entries.len() as SyncId;
        let to = to.unwrap_or(latest).min(latest);
        let mut page: Vec<LogEntry> = log
            .entries
            .iter()
            .filter(|e| e.sync_id >= from && e.sync_id <= to && !log.hidden.contains(&e.sync_id))
            .cloned()
            .collect();

        if self.duplicate_pages.load(Ordering::SeqCst) {
            let copy = page.clone();
            page.extend(copy);
        }
        if self.reverse_pages.load(Ordering::SeqCst) {
            page.reverse();
        }

        Ok(PullResponse::new(page, to))
    }

    async fn bootstrap(&self) -> SyncResult<BootstrapResponse> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected().await?;

        let log = self.log.lock();
        let mut current: BTreeMap<String, (String, serde_json::Value)> = BTreeMap::new();
        for entry in &log.entries {
            let tx = &entry.transaction;
            if tx.action.is_upsert() {
                current.insert(tx.record_id.clone(), (tx.model_type.clone(), tx.data.clone()));
            } else {
                current.remove(&tx.record_id);
            }
        }

        let mut models: BTreeMap<String, Vec<ModelRecord>> = BTreeMap::new();
        for (id, (model_type, data)) in current {
            models.entry(model_type).or_default().push(ModelRecord { id, data });
        }

        Ok(BootstrapResponse {
            sync_id: log.entries.len() as SyncId,
            models,
        })
    }
}
