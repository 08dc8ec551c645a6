//! Folding the log into current record state.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tidesync_protocol::{BootstrapResponse, LogEntry, ModelRecord, Record, SyncId};

/// Current state of every record as of one log position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Last sync id folded into this snapshot.
    pub sync_id: SyncId,
    /// Records grouped by model type, each group ordered by id.
    pub models: BTreeMap<String, Vec<Record>>,
}

impl Snapshot {
    /// Groups records by model type.
    pub fn from_records(sync_id: SyncId, records: impl IntoIterator<Item = Record>) -> Self {
        let mut models: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in records {
            models
                .entry(record.model_type.clone())
                .or_default()
                .push(record);
        }
        for group in models.values_mut() {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Self { sync_id, models }
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    /// Returns the wire form served by `GET /bootstrap`.
    pub fn to_response(&self) -> BootstrapResponse {
        BootstrapResponse {
            sync_id: self.sync_id,
            models: self
                .models
                .iter()
                .map(|(model_type, records)| {
                    (
                        model_type.clone(),
                        records.iter().map(ModelRecord::from).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// Accumulates log entries into a [`Snapshot`].
///
/// Entries must be applied in ascending sync id order. Create and update
/// overwrite the whole record; delete removes it.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    sync_id: SyncId,
    records: BTreeMap<String, Record>,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one entry, stamping new writes with the current time.
    pub fn apply(&mut self, entry: &LogEntry) {
        self.apply_at(entry, Utc::now());
    }

    /// Folds one entry, stamping new writes with `now`.
    pub fn apply_at(&mut self, entry: &LogEntry, now: DateTime<Utc>) {
        let tx = &entry.transaction;
        match Record::upserted(tx, self.records.get(&tx.record_id), now) {
            Some(record) => {
                self.records.insert(record.id.clone(), record);
            }
            None => {
                self.records.remove(&tx.record_id);
            }
        }
        self.sync_id = self.sync_id.max(entry.sync_id);
    }

    /// Returns the last folded sync id.
    pub fn sync_id(&self) -> SyncId {
        self.sync_id
    }

    /// Finishes the fold.
    pub fn finish(self) -> Snapshot {
        Snapshot::from_records(self.sync_id, self.records.into_values())
    }
}
