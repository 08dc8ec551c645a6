//! Materialized records.

use crate::operation::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current state of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Record id, unique across all model types.
    pub id: String,
    /// Record type tag.
    pub model_type: String,
    /// Record payload.
    pub data: Value,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record with both timestamps set to `now`.
    pub fn new(
        id: impl Into<String>,
        model_type: impl Into<String>,
        data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            model_type: model_type.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the record produced by applying `tx` on top of `previous`.
    ///
    /// Create and update are full overwrites that keep the original
    /// `created_at`; delete yields `None`.
    pub fn upserted(tx: &Transaction, previous: Option<&Record>, now: DateTime<Utc>) -> Option<Record> {
        if !tx.action.is_upsert() {
            return None;
        }

        let created_at = previous.map(|r| r.created_at).unwrap_or(now);
        Some(Record {
            id: tx.record_id.clone(),
            model_type: tx.model_type.clone(),
            data: tx.data.clone(),
            created_at,
            updated_at: now,
        })
    }
}
