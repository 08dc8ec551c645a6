//! The client sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mirror::{queued_tx_id, LocalMirror, MirrorWrite};
use crate::state::{EngineState, SyncStats};
use crate::subscriber::{Subscribers, SubscriptionToken, TransactionHandler};
use crate::transport::SyncTransport;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tidesync_protocol::{LogEntry, Origin, Record, SyncId, Transaction};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Ack = oneshot::Sender<SyncResult<SyncId>>;

/// A local write that has been applied and queued for the server.
///
/// Dropping it does not cancel the push.
#[derive(Debug)]
pub struct PendingWrite {
    transaction: Transaction,
    ack: oneshot::Receiver<SyncResult<SyncId>>,
}

impl PendingWrite {
    /// Returns the queued transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Returns the id of the written record.
    pub fn record_id(&self) -> &str {
        &self.transaction.record_id
    }

    /// Waits for the server to accept the write.
    ///
    /// Resolves with the sync id the server reported for the push carrying
    /// it, or with the error that ended its push attempts.
    pub async fn acknowledged(self) -> SyncResult<SyncId> {
        match self.ack.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Stopped),
        }
    }
}

/// The sync engine.
///
/// Keeps a [`LocalMirror`] in step with the server log: bootstraps once,
/// applies local writes optimistically, pushes them through a durable
/// queue and polls for everything else by cursor.
///
/// Cloning is cheap; every clone drives the same engine.
pub struct SyncEngine<T: SyncTransport, M: LocalMirror> {
    inner: Arc<Inner<T, M>>,
}

impl<T: SyncTransport, M: LocalMirror> Clone for SyncEngine<T, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T, M> {
    config: SyncConfig,
    transport: T,
    mirror: M,
    /// Serializes every mirror transaction and subscriber notification.
    /// Never held across an await.
    mirror_lock: Mutex<()>,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
    subscribers: Subscribers,
    waiters: Mutex<HashMap<String, Ack>>,
    /// txIds acknowledged by a push whose log entries poll has not reached yet.
    recent_acks: Mutex<HashSet<String>>,
    /// Largest push the server has not refused as too large.
    push_limit: AtomicUsize,
    init_lock: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: SyncTransport, M: LocalMirror> SyncEngine<T, M> {
    /// Creates an engine. Nothing runs until [`init`](Self::init).
    pub fn new(config: SyncConfig, transport: T, mirror: M) -> Self {
        let (shutdown, _) = watch::channel(false);
        let push_limit = AtomicUsize::new(config.push_batch_size.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                mirror,
                mirror_lock: Mutex::new(()),
                state: RwLock::new(EngineState::Uninitialized),
                stats: RwLock::new(SyncStats::default()),
                subscribers: Subscribers::default(),
                waiters: Mutex::new(HashMap::new()),
                recent_acks: Mutex::new(HashSet::new()),
                push_limit,
                init_lock: tokio::sync::Mutex::new(()),
                flush_lock: tokio::sync::Mutex::new(()),
                flush_notify: Arc::new(Notify::new()),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Brings the engine to `Ready`.
    ///
    /// With a persisted cursor the bootstrap is skipped and poll catches
    /// up. Otherwise the mirror is replaced by the server snapshot. Calling
    /// `init` on a ready engine does nothing; a call made while another is
    /// bootstrapping waits for it and then returns `Ok` if it succeeded.
    pub async fn init(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let _init = inner.init_lock.lock().await;
        {
            let mut state = inner.state.write();
            match *state {
                EngineState::Ready => return Ok(()),
                EngineState::Stopped => return Err(SyncError::Stopped),
                EngineState::Bootstrapping => {
                    return Err(SyncError::InvalidStateTransition {
                        from: state.to_string(),
                        to: EngineState::Bootstrapping.to_string(),
                    })
                }
                EngineState::Uninitialized => *state = EngineState::Bootstrapping,
            }
        }

        if let Err(e) = inner.bootstrap().await {
            warn!(error = %e, "bootstrap failed");
            let mut state = inner.state.write();
            if *state == EngineState::Bootstrapping {
                *state = EngineState::Uninitialized;
            }
            inner.stats.write().last_error = Some(e.to_string());
            return Err(e);
        }

        {
            let mut state = inner.state.write();
            if *state != EngineState::Bootstrapping {
                return Err(SyncError::Stopped);
            }
            *state = EngineState::Ready;
        }

        inner.spawn_loops();
        if inner.mirror.pending_count()? > 0 {
            inner.flush_notify.notify_one();
        }
        info!(server = %inner.config.server_url, "sync engine ready");
        Ok(())
    }

    /// Creates a record with a generated id.
    pub fn create(
        &self,
        model_type: impl Into<String>,
        data: serde_json::Value,
    ) -> SyncResult<PendingWrite> {
        self.create_with_id(model_type, Uuid::new_v4().to_string(), data)
    }

    /// Creates a record with a caller-chosen id.
    pub fn create_with_id(
        &self,
        model_type: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> SyncResult<PendingWrite> {
        self.inner.mutate(Transaction::create(model_type, id, data))
    }

    /// Replaces a record's data.
    pub fn update(
        &self,
        model_type: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> SyncResult<PendingWrite> {
        self.inner.mutate(Transaction::update(model_type, id, data))
    }

    /// Deletes a record.
    pub fn delete(
        &self,
        model_type: impl Into<String>,
        id: impl Into<String>,
    ) -> SyncResult<PendingWrite> {
        self.inner.mutate(Transaction::delete(model_type, id))
    }

    /// Pushes the outbound queue now and returns how many writes were acknowledged.
    pub async fn flush(&self) -> SyncResult<usize> {
        self.inner.flush().await
    }

    /// Pulls and applies everything after the cursor. Returns the number of
    /// log entries applied.
    pub async fn poll_once(&self) -> SyncResult<usize> {
        self.inner.poll_once().await
    }

    /// Registers a handler for every transaction the engine applies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, handler: impl TransactionHandler) -> SyncResult<SubscriptionToken> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let _guard = self.inner.mirror_lock.lock();
        if *self.inner.state.read() == EngineState::Stopped {
            return Err(SyncError::Stopped);
        }
        Ok(self.inner.subscribers.add(&runtime, Arc::new(handler)))
    }

    /// Removes a handler. Returns false if the token is unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.subscribers.remove(token)
    }

    /// Stops polling, pushing and notification. Safe to call in any state.
    pub fn stop(&self) {
        let inner = &self.inner;
        let previous = {
            let _guard = inner.mirror_lock.lock();
            let previous = std::mem::replace(&mut *inner.state.write(), EngineState::Stopped);
            if previous != EngineState::Stopped {
                inner.subscribers.clear();
            }
            previous
        };
        if previous == EngineState::Stopped {
            return;
        }

        inner.shutdown.send_replace(true);
        for task in inner.tasks.lock().drain(..) {
            task.abort();
        }
        for (_, ack) in inner.waiters.lock().drain() {
            let _ = ack.send(Err(SyncError::Stopped));
        }
        info!(from = %previous, "sync engine stopped");
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the last applied sync id.
    pub fn cursor(&self) -> SyncResult<Option<SyncId>> {
        self.inner.mirror.cursor()
    }

    /// Returns every local record of a model type.
    pub fn records(&self, model_type: &str) -> SyncResult<Vec<Record>> {
        self.inner.mirror.get_all(model_type)
    }

    /// Returns a local record by id.
    pub fn record(&self, id: &str) -> SyncResult<Option<Record>> {
        self.inner.mirror.get_by_id(id)
    }

    /// Returns the number of writes waiting for the server.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.inner.mirror.pending_count()
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Returns the local mirror.
    pub fn mirror(&self) -> &M {
        &self.inner.mirror
    }
}

impl<T: SyncTransport, M: LocalMirror> Inner<T, M> {
    fn require_ready(&self) -> SyncResult<()> {
        let state = *self.state.read();
        match state {
            EngineState::Ready => Ok(()),
            EngineState::Stopped => Err(SyncError::Stopped),
            state => Err(SyncError::NotReady { state }),
        }
    }

    async fn with_timeout<R>(&self, call: impl Future<Output = SyncResult<R>>) -> SyncResult<R> {
        tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn bootstrap(&self) -> SyncResult<()> {
        if let Some(cursor) = self.mirror.cursor()? {
            info!(cursor, "resuming from persisted cursor");
            return Ok(());
        }

        let snapshot = self.with_timeout(self.transport.bootstrap()).await?;
        let sync_id = snapshot.sync_id;
        let records = snapshot.into_records(Utc::now());
        let count = records.len();

        let mut writes = Vec::with_capacity(count + 2);
        writes.push(MirrorWrite::Clear);
        writes.extend(records.into_iter().map(MirrorWrite::Put));
        writes.push(MirrorWrite::SetCursor(sync_id));
        {
            let _guard = self.mirror_lock.lock();
            self.mirror.commit(writes)?;
        }

        info!(sync_id, records = count, "bootstrapped");
        Ok(())
    }

    fn spawn_loops(self: &Arc<Self>) {
        let poll = tokio::spawn(poll_loop(
            Arc::downgrade(self),
            self.shutdown.subscribe(),
        ));
        let flush = tokio::spawn(flush_loop(
            Arc::downgrade(self),
            Arc::clone(&self.flush_notify),
            self.shutdown.subscribe(),
        ));
        self.tasks.lock().extend([poll, flush]);
    }

    fn mutate(&self, transaction: Transaction) -> SyncResult<PendingWrite> {
        self.require_ready()?;
        let tx_id = Uuid::new_v4().to_string();
        let transaction = transaction.into_local(tx_id.clone());
        transaction.validate()?;

        let (sender, receiver) = oneshot::channel();
        {
            let _guard = self.mirror_lock.lock();
            let existing = self.mirror.get_by_id(&transaction.record_id)?;
            let write = match Record::upserted(&transaction, existing.as_ref(), Utc::now()) {
                Some(record) => MirrorWrite::Put(record),
                None => MirrorWrite::Delete(transaction.record_id.clone()),
            };
            self.mirror
                .commit(vec![write, MirrorWrite::Enqueue(transaction.clone())])?;
            self.waiters.lock().insert(tx_id, sender);
            self.subscribers.notify(std::slice::from_ref(&transaction));
        }

        debug!(
            model_type = %transaction.model_type,
            id = %transaction.record_id,
            action = %transaction.action,
            "local write queued"
        );
        self.flush_notify.notify_one();

        Ok(PendingWrite {
            transaction,
            ack: receiver,
        })
    }

    /// Pushes the queue head first.
    ///
    /// A batch the server refuses is split in half until the refusal is
    /// pinned on a single write. Only that write is dropped, and the flush
    /// then returns the rejection.
    async fn flush(&self) -> SyncResult<usize> {
        self.require_ready()?;
        let _flush = self.flush_lock.lock().await;
        let mut acknowledged = 0;
        let mut limit = self.push_limit.load(Ordering::SeqCst);

        loop {
            self.require_ready()?;
            let batch: Vec<Transaction> = self
                .mirror
                .pending(limit)?
                .into_iter()
                .map(|p| p.transaction)
                .collect();
            if batch.is_empty() {
                break;
            }

            let err = match self.push_with_retry(&batch).await {
                Ok(sync_id) => {
                    acknowledged += self.acknowledge(&batch, sync_id)?;
                    continue;
                }
                Err(SyncError::BatchTooLarge(message)) if batch.len() > 1 => {
                    limit = batch.len().div_ceil(2);
                    self.push_limit.store(limit, Ordering::SeqCst);
                    warn!(limit, %message, "server refused batch size, splitting");
                    continue;
                }
                Err(SyncError::Rejected(message)) if batch.len() > 1 => {
                    limit = batch.len().div_ceil(2);
                    debug!(count = batch.len(), %message, "batch rejected, narrowing down");
                    continue;
                }
                Err(SyncError::Rejected(message)) => {
                    match self.reject(&batch[0], &message).await {
                        Ok(()) => {
                            self.stats.write().last_error = Some(message.clone());
                            if self.mirror.pending_count()? > 0 {
                                self.flush_notify.notify_one();
                            }
                            return Err(SyncError::Rejected(message));
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.fail_waiters(&batch, &err);
            self.stats.write().last_error = Some(err.to_string());
            return Err(err);
        }

        Ok(acknowledged)
    }

    /// Drops a write the server refused and puts its record back to the
    /// server's current state, with any later queued writes replayed on top.
    ///
    /// The record is re-read from a fresh snapshot because poll does not
    /// overwrite records with queued writes. If the snapshot cannot be
    /// fetched the write stays queued.
    async fn reject(&self, tx: &Transaction, message: &str) -> SyncResult<()> {
        let tx_id = queued_tx_id(tx)?;
        let snapshot = self.with_timeout(self.transport.bootstrap()).await?;
        let now = Utc::now();
        let server_record = snapshot
            .into_records(now)
            .into_iter()
            .find(|r| r.id == tx.record_id);

        {
            let _guard = self.mirror_lock.lock();
            let mut record = server_record;
            for queued in self.mirror.pending(usize::MAX)? {
                let queued = queued.transaction;
                if queued.record_id == tx.record_id && queued.tx_id.as_deref() != Some(tx_id) {
                    record = Record::upserted(&queued, record.as_ref(), now);
                }
            }

            let (write, restored) = match &record {
                Some(record) => (
                    MirrorWrite::Put(record.clone()),
                    Transaction::update(&record.model_type, &record.id, record.data.clone()),
                ),
                None => (
                    MirrorWrite::Delete(tx.record_id.clone()),
                    Transaction::delete(&tx.model_type, &tx.record_id),
                ),
            };
            self.mirror
                .commit(vec![MirrorWrite::Dequeue(tx_id.to_string()), write])?;
            self.subscribers.notify(std::slice::from_ref(&restored));
        }

        error!(
            model_type = %tx.model_type,
            id = %tx.record_id,
            action = %tx.action,
            %message,
            "write rejected, local change reverted"
        );
        self.fail_waiters(
            std::slice::from_ref(tx),
            &SyncError::Rejected(message.to_string()),
        );
        Ok(())
    }

    async fn push_with_retry(&self, batch: &[Transaction]) -> SyncResult<SyncId> {
        let retry = &self.config.retry;
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.with_timeout(self.transport.push(batch)).await {
                Ok(sync_id) => {
                    debug!(count = batch.len(), sync_id, attempt, "push accepted");
                    return Ok(sync_id);
                }
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(attempt, ?delay, error = %e, "push failed, retrying");
                    self.stats.write().retries += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return Err(SyncError::Stopped),
                    }
                }
                Err(e) if e.is_retryable() => {
                    return Err(SyncError::PushFailed {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dequeues an accepted batch. The cursor moves only when the batch sits
    /// directly after it in the log.
    fn acknowledge(&self, batch: &[Transaction], sync_id: SyncId) -> SyncResult<usize> {
        let ids: Vec<&str> = batch.iter().filter_map(|t| t.tx_id.as_deref()).collect();

        let still_queued: Vec<String> = {
            let _guard = self.mirror_lock.lock();
            let queued = self.queued_ids()?;
            let still_queued: Vec<String> = ids
                .iter()
                .filter(|id| queued.contains(**id))
                .map(|id| id.to_string())
                .collect();

            let cursor = self.mirror.cursor()?.unwrap_or(0);
            let contiguous = still_queued.len() == batch.len()
                && sync_id.checked_sub(batch.len() as SyncId) == Some(cursor);

            let mut writes: Vec<MirrorWrite> = still_queued
                .iter()
                .cloned()
                .map(MirrorWrite::Dequeue)
                .collect();
            if contiguous {
                writes.push(MirrorWrite::SetCursor(sync_id));
            }
            if !writes.is_empty() {
                self.mirror.commit(writes)?;
            }
            if !contiguous {
                self.recent_acks.lock().extend(still_queued.iter().cloned());
            }
            still_queued
        };

        self.resolve(still_queued.iter().map(|id| (id.as_str(), sync_id)));
        self.stats.write().transactions_pushed += still_queued.len() as u64;
        Ok(still_queued.len())
    }

    fn queued_ids(&self) -> SyncResult<HashSet<String>> {
        Ok(self
            .mirror
            .pending(usize::MAX)?
            .into_iter()
            .filter_map(|p| p.transaction.tx_id)
            .collect())
    }

    fn resolve<'a>(&self, acks: impl IntoIterator<Item = (&'a str, SyncId)>) {
        let mut waiters = self.waiters.lock();
        for (tx_id, sync_id) in acks {
            if let Some(ack) = waiters.remove(tx_id) {
                let _ = ack.send(Ok(sync_id));
            }
        }
    }

    fn fail_waiters(&self, batch: &[Transaction], err: &SyncError) {
        let mut waiters = self.waiters.lock();
        for tx_id in batch.iter().filter_map(|t| t.tx_id.as_deref()) {
            if let Some(ack) = waiters.remove(tx_id) {
                let _ = ack.send(Err(err.for_waiter()));
            }
        }
    }

    async fn poll_once(&self) -> SyncResult<usize> {
        self.require_ready()?;
        let page_size = self.config.pull_batch_size as SyncId;
        let mut applied = 0;

        loop {
            let cursor = self.mirror.cursor()?.unwrap_or(0);
            let response = self
                .with_timeout(self.transport.pull(cursor + 1, Some(cursor + page_size)))
                .await?;
            let received = response.transactions.len() as SyncId;
            let count = self.apply_remote(response.transactions)?;
            applied += count;
            if count == 0 || received < page_size {
                break;
            }
        }

        {
            let mut stats = self.stats.write();
            stats.polls_completed += 1;
            stats.transactions_pulled += applied as u64;
            stats.last_poll_time = Some(Instant::now());
            stats.last_error = None;
        }

        if applied > 0 {
            debug!(applied, "poll applied entries");
        }
        Ok(applied)
    }

    /// Applies the contiguous run of entries after the cursor in one commit.
    fn apply_remote(&self, mut entries: Vec<LogEntry>) -> SyncResult<usize> {
        entries.sort_by_key(|e| e.sync_id);
        let mut acked: Vec<(String, SyncId)> = Vec::new();

        let applied = {
            let _guard = self.mirror_lock.lock();
            if *self.state.read() == EngineState::Stopped {
                return Err(SyncError::Stopped);
            }

            let cursor = self.mirror.cursor()?.unwrap_or(0);
            let pending = self.mirror.pending(usize::MAX)?;
            let mut queued: HashSet<String> = HashSet::new();
            let mut pending_writes: HashMap<String, usize> = HashMap::new();
            for p in pending {
                *pending_writes.entry(p.transaction.record_id).or_default() += 1;
                if let Some(tx_id) = p.transaction.tx_id {
                    queued.insert(tx_id);
                }
            }

            let recent = self.recent_acks.lock().clone();
            let mut recent_hits = Vec::new();
            let mut overlay: HashMap<String, Option<Record>> = HashMap::new();
            let mut writes = Vec::new();
            let mut delivered = Vec::new();
            let mut next = cursor + 1;
            let now = Utc::now();

            for entry in entries {
                if entry.sync_id < next {
                    continue;
                }
                if entry.sync_id > next {
                    debug!(expected = next, got = entry.sync_id, "gap in pulled entries");
                    break;
                }
                next += 1;

                let sync_id = entry.sync_id;
                let mut tx = entry.transaction;
                tx.origin = Origin::Server;

                let mut echo = false;
                if let Some(tx_id) = tx.tx_id.as_deref() {
                    if queued.remove(tx_id) {
                        echo = true;
                        writes.push(MirrorWrite::Dequeue(tx_id.to_string()));
                        if let Some(n) = pending_writes.get_mut(&tx.record_id) {
                            *n -= 1;
                        }
                        acked.push((tx_id.to_string(), sync_id));
                    } else if recent.contains(tx_id) {
                        echo = true;
                        recent_hits.push(tx_id.to_string());
                    }
                }

                if pending_writes.get(&tx.record_id).copied().unwrap_or(0) == 0 {
                    let previous = match overlay.get(&tx.record_id) {
                        Some(record) => record.clone(),
                        None => self.mirror.get_by_id(&tx.record_id)?,
                    };
                    let record = Record::upserted(&tx, previous.as_ref(), now);
                    writes.push(match &record {
                        Some(record) => MirrorWrite::Put(record.clone()),
                        None => MirrorWrite::Delete(tx.record_id.clone()),
                    });
                    overlay.insert(tx.record_id.clone(), record);
                }

                if !echo {
                    delivered.push(tx);
                }
            }

            let applied = (next - 1 - cursor) as usize;
            if applied > 0 {
                writes.push(MirrorWrite::SetCursor(next - 1));
                self.mirror.commit(writes)?;

                let mut recent = self.recent_acks.lock();
                for tx_id in &recent_hits {
                    recent.remove(tx_id);
                }
                drop(recent);

                self.subscribers.notify(&delivered);
            }
            applied
        };

        self.resolve(acked.iter().map(|(id, sync_id)| (id.as_str(), *sync_id)));
        if !acked.is_empty() {
            self.stats.write().transactions_pushed += acked.len() as u64;
        }
        Ok(applied)
    }
}

async fn poll_loop<T: SyncTransport, M: LocalMirror>(
    engine: Weak<Inner<T, M>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let interval = match engine.upgrade() {
            Some(inner) => inner.config.poll_interval,
            None => break,
        };
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }

        let Some(inner) = engine.upgrade() else { break };
        if !inner.state.read().is_ready() {
            break;
        }
        if let Err(e) = inner.poll_once().await {
            warn!(error = %e, "poll failed");
            inner.stats.write().last_error = Some(e.to_string());
        }
        match inner.mirror.pending_count() {
            Ok(0) => {}
            Ok(_) => inner.flush_notify.notify_one(),
            Err(e) => warn!(error = %e, "failed to read outbound queue"),
        }
    }
    debug!("poll loop exited");
}

async fn flush_loop<T: SyncTransport, M: LocalMirror>(
    engine: Weak<Inner<T, M>>,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = notify.notified() => {}
            _ = shutdown.changed() => break,
        }

        let Some(inner) = engine.upgrade() else { break };
        if !inner.state.read().is_ready() {
            break;
        }
        if let Err(e) = inner.flush().await {
            warn!(error = %e, "background flush failed");
        }
    }
    debug!("flush loop exited");
}
