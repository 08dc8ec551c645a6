//! # TideSync Protocol
//!
//! Sync protocol types and the JSON wire format for TideSync.
//!
//! This crate provides:
//! - [`Transaction`] for a single create/update/delete intent
//! - [`LogEntry`] for a transaction placed in the server log
//! - [`Record`] for materialized record state
//! - Request/response bodies for push, pull and bootstrap
//! - Validation shared by the server and the client engine
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire format
//!
//! ```text
//! POST /transactions   [{"type","id","action","data","txId"?}, ...] -> {"syncId"}
//! GET  /transactions   ?from=&to=                                   -> {"syncId","transactions":[...]}
//! GET  /bootstrap                                                   -> {"syncId","models":{...}}
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod oplog;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BootstrapResponse, ErrorResponse, ModelRecord, PullQuery, PullResponse, PushResponse,
};
pub use operation::{validate_batch, Action, Origin, Transaction, TransactionPayload};
pub use oplog::{LogEntry, SyncId};
pub use record::Record;
