//! Sync transactions.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of change a transaction applies to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Record was created.
    Create,
    /// Record was replaced.
    Update,
    /// Record was removed.
    Delete,
}

impl Action {
    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Returns true for actions that write the record (create and update are upserts).
    pub fn is_upsert(&self) -> bool {
        matches!(self, Action::Create | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(ProtocolError::InvalidAction(other.to_string())),
        }
    }
}

/// Where a transaction came from.
///
/// Local transactions are pushed to the server; server transactions were
/// pulled from the log and must never be pushed back. The origin is not part
/// of the wire format: anything decoded from the wire is [`Origin::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// Performed on this client.
    Local,
    /// Received from the server log.
    #[default]
    Server,
}

/// A single create/update/delete intent against one record.
///
/// # Fields
///
/// - `model_type`: the record's type tag (`"type"` on the wire)
/// - `record_id`: the client-generated record id (`"id"` on the wire)
/// - `action`: create, update or delete
/// - `data`: the full record payload (ignored for deletes)
/// - `tx_id`: local transaction identity used for push deduplication
/// - `origin`: local or server, never serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record type tag.
    #[serde(rename = "type")]
    pub model_type: String,
    /// Record id.
    #[serde(rename = "id")]
    pub record_id: String,
    /// Action to apply.
    pub action: Action,
    /// Record payload.
    #[serde(default)]
    pub data: Value,
    /// Local transaction identity.
    #[serde(rename = "txId", default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Where the transaction originated.
    #[serde(skip)]
    pub origin: Origin,
}

impl Transaction {
    /// Creates a server-origin transaction without a local identity.
    pub fn new(
        model_type: impl Into<String>,
        record_id: impl Into<String>,
        action: Action,
        data: Value,
    ) -> Self {
        Self {
            model_type: model_type.into(),
            record_id: record_id.into(),
            action,
            data,
            tx_id: None,
            origin: Origin::Server,
        }
    }

    /// Creates a create transaction.
    pub fn create(model_type: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self::new(model_type, record_id, Action::Create, data)
    }

    /// Creates an update transaction.
    pub fn update(model_type: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self::new(model_type, record_id, Action::Update, data)
    }

    /// Creates a delete transaction.
    pub fn delete(model_type: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(model_type, record_id, Action::Delete, Value::Null)
    }

    /// Marks the transaction as performed locally with the given identity.
    pub fn into_local(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_id = Some(tx_id.into());
        self.origin = Origin::Local;
        self
    }

    /// Sets the local transaction identity.
    pub fn with_tx_id(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_id = Some(tx_id.into());
        self
    }

    /// Returns true if this transaction was performed on this client.
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    /// Checks the transaction is well formed.
    ///
    /// Type and id must be non-empty; create and update must carry data.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.model_type.trim().is_empty() {
            return Err(ProtocolError::Validation("missing type".into()));
        }
        if self.record_id.trim().is_empty() {
            return Err(ProtocolError::Validation("missing id".into()));
        }
        if self.action.is_upsert() && self.data.is_null() {
            return Err(ProtocolError::Validation(format!(
                "missing data for {} of {}",
                self.action, self.record_id
            )));
        }
        Ok(())
    }
}

/// A transaction as received on `POST /transactions`, before validation.
///
/// Every field is optional so that a malformed element is reported as a
/// validation error for the whole batch instead of a decoding failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Record type tag.
    #[serde(rename = "type", default)]
    pub model_type: Option<String>,
    /// Record id.
    #[serde(default)]
    pub id: Option<String>,
    /// Action name.
    #[serde(default)]
    pub action: Option<String>,
    /// Record payload.
    #[serde(default)]
    pub data: Option<Value>,
    /// Local transaction identity.
    #[serde(rename = "txId", default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

impl TransactionPayload {
    /// Validates the payload and converts it into a server-origin transaction.
    pub fn into_transaction(self) -> ProtocolResult<Transaction> {
        let model_type = self
            .model_type
            .ok_or_else(|| ProtocolError::Validation("missing type".into()))?;
        let record_id = self
            .id
            .ok_or_else(|| ProtocolError::Validation("missing id".into()))?;
        let action: Action = self
            .action
            .ok_or_else(|| ProtocolError::Validation("missing action".into()))?
            .parse()?;

        let transaction = Transaction {
            model_type,
            record_id,
            action,
            data: self.data.unwrap_or(Value::Null),
            tx_id: self.tx_id.filter(|id| !id.is_empty()),
            origin: Origin::Server,
        };
        transaction.validate()?;
        Ok(transaction)
    }
}

impl From<&Transaction> for TransactionPayload {
    fn from(tx: &Transaction) -> Self {
        Self {
            model_type: Some(tx.model_type.clone()),
            id: Some(tx.record_id.clone()),
            action: Some(tx.action.as_str().to_string()),
            data: Some(tx.data.clone()),
            tx_id: tx.tx_id.clone(),
        }
    }
}

/// Validates a whole push batch.
///
/// Fails on the first invalid element, naming its position; an empty batch
/// is rejected. Either every element is returned or none is.
pub fn validate_batch(payloads: Vec<TransactionPayload>) -> ProtocolResult<Vec<Transaction>> {
    if payloads.is_empty() {
        return Err(ProtocolError::Validation("empty batch".into()));
    }

    payloads
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            payload.into_transaction().map_err(|e| match e {
                ProtocolError::Validation(msg) => {
                    ProtocolError::Validation(format!("transaction {}: {}", index, msg))
                }
                other => other,
            })
        })
        .collect()
}
