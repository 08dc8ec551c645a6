//! # TideSync Server
//!
//! Server side of TideSync: an append-only transaction log and the HTTP
//! endpoints clients sync against.
//!
//! This crate provides:
//! - The [`TransactionLog`] contract with in-memory and SQLite implementations
//! - [`SnapshotBuilder`], the fold from log entries to current record state
//! - Request handlers and an axum router for push, pull and bootstrap
//!
//! # Protocol
//!
//! Every admitted transaction receives the next sync id. Ids start at 1 and
//! are gapless, so a client holding cursor `n` catches up by reading
//! `n + 1..`. A bootstrap snapshot is exactly the fold of the log up to the
//! sync id it reports.
//!
//! ```rust,no_run
//! use tidesync_server::{ServerConfig, SyncServer};
//!
//! # async fn run() -> tidesync_server::ServerResult<()> {
//! let config = ServerConfig::from_env().unwrap_or_default();
//! SyncServer::open(config)?.serve().await
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod oplog;
mod routes;
mod server;
mod snapshot;
mod sqlite;

pub use config::{ConfigError, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use oplog::{MemoryTransactionLog, TransactionLog};
pub use routes::router;
pub use server::SyncServer;
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use sqlite::SqliteTransactionLog;
