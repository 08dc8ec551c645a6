//! Log entries.

use crate::operation::Transaction;
use serde::{Deserialize, Serialize};

/// Position of a transaction in the server log.
///
/// Sync ids start at 1 and are gapless; 0 means "nothing applied yet".
pub type SyncId = u64;

/// A transaction admitted to the server log.
///
/// On the wire the transaction fields are flattened next to `syncId`:
///
/// ```text
/// {"syncId": 7, "type": "Todo", "id": "a1", "action": "update", "data": {...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Assigned sync id.
    #[serde(rename = "syncId")]
    pub sync_id: SyncId,
    /// The admitted transaction.
    #[serde(flatten)]
    pub transaction: Transaction,
}

impl LogEntry {
    /// Creates a new log entry.
    pub fn new(sync_id: SyncId, transaction: Transaction) -> Self {
        Self {
            sync_id,
            transaction,
        }
    }

    /// Returns the record id this entry touches.
    pub fn record_id(&self) -> &str {
        &self.transaction.record_id
    }

    /// Returns the local transaction identity, if the pusher supplied one.
    pub fn tx_id(&self) -> Option<&str> {
        self.transaction.tx_id.as_deref()
    }
}
