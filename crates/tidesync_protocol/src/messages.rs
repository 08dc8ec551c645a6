//! Request and response bodies for the sync endpoints.

use crate::oplog::{LogEntry, SyncId};
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Response to `POST /transactions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Sync id of the last transaction in the pushed batch.
    pub sync_id: SyncId,
}

impl PushResponse {
    /// Creates a new push response.
    pub fn new(sync_id: SyncId) -> Self {
        Self { sync_id }
    }
}

/// Query string of `GET /transactions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQuery {
    /// First sync id to return (inclusive). Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SyncId>,
    /// Last sync id to return (inclusive). Defaults to the latest entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<SyncId>,
}

impl PullQuery {
    /// Creates a query for `from..=to`.
    pub fn new(from: SyncId, to: Option<SyncId>) -> Self {
        Self {
            from: Some(from),
            to,
        }
    }

    /// Returns the inclusive lower bound, treating 0 and absence as 1.
    pub fn from_or_default(&self) -> SyncId {
        self.from.unwrap_or(1).max(1)
    }
}

/// Response to `GET /transactions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Highest sync id covered by this response.
    pub sync_id: SyncId,
    /// Entries in ascending sync id order.
    pub transactions: Vec<LogEntry>,
}

impl PullResponse {
    /// Creates a pull response.
    ///
    /// `sync_id` is the highest returned id, or `fallback` when `transactions`
    /// is empty.
    pub fn new(transactions: Vec<LogEntry>, fallback: SyncId) -> Self {
        let sync_id = transactions
            .iter()
            .map(|e| e.sync_id)
            .max()
            .unwrap_or(fallback);
        Self {
            sync_id,
            transactions,
        }
    }
}

/// A record as carried by the bootstrap response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Record id.
    pub id: String,
    /// Record payload.
    pub data: Value,
}

impl From<&Record> for ModelRecord {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            data: record.data.clone(),
        }
    }
}

/// Response to `GET /bootstrap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    /// Log position the snapshot is equivalent to.
    pub sync_id: SyncId,
    /// Current records grouped by model type.
    pub models: BTreeMap<String, Vec<ModelRecord>>,
}

impl BootstrapResponse {
    /// Returns the total number of records in the snapshot.
    pub fn record_count(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    /// Converts the snapshot into mirror records stamped with `now`.
    pub fn into_records(self, now: DateTime<Utc>) -> Vec<Record> {
        self.models
            .into_iter()
            .flat_map(|(model_type, records)| {
                records
                    .into_iter()
                    .map(move |r| Record::new(r.id, model_type.clone(), r.data, now))
            })
            .collect()
    }
}

/// Error body returned with 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
