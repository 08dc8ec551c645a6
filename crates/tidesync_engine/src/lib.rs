//! # TideSync Engine
//!
//! Offline-first client for a TideSync server.
//!
//! This crate provides:
//! - [`SyncEngine`]: bootstrap, optimistic local writes, push with retry
//!   and poll by cursor
//! - [`LocalMirror`] with an in-memory and a SQLite implementation
//! - A durable outbound queue inside the mirror
//! - [`SyncTransport`] with an HTTP implementation and a mock for tests
//!
//! ## Model
//!
//! The server log is the single source of truth. A client bootstraps from a
//! snapshot taken at some sync id, then polls `(cursor, latest]` and applies
//! entries in ascending sync id order. Local writes are applied to the
//! mirror at once, queued, and pushed; the server assigns their position.
//! When two writes touch the same record, the one with the higher sync id
//! wins by full overwrite.
//!
//! ## Key Invariants
//!
//! - The mirror and the cursor change together in one grouped commit
//! - The cursor never skips an entry: only a contiguous run after it is applied
//! - A queued write is removed only once the server has accepted or rejected it
//! - A client's own accepted writes are never delivered to subscribers twice
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use tidesync_engine::{HttpTransport, SqliteMirror, SyncConfig, SyncEngine};
//!
//! # async fn run() -> tidesync_engine::SyncResult<()> {
//! let config = SyncConfig::new("http://127.0.0.1:8080");
//! let transport = HttpTransport::from_config(&config)?;
//! let mirror = SqliteMirror::open("client.db")?;
//!
//! let engine = SyncEngine::new(config, transport, mirror);
//! engine.init().await?;
//! engine.subscribe(|tx: &tidesync_protocol::Transaction| println!("{} {}", tx.action, tx.record_id))?;
//!
//! let write = engine.create("Todo", json!({ "title": "Buy milk" }))?;
//! let sync_id = write.acknowledged().await?;
//! println!("accepted at {}", sync_id);
//! engine.stop();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod mirror;
mod sqlite;
mod state;
mod subscriber;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{PendingWrite, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http::HttpTransport;
pub use mirror::{LocalMirror, MemoryMirror, MirrorWrite, PendingTransaction};
pub use sqlite::SqliteMirror;
pub use state::{EngineState, SyncStats};
pub use subscriber::{SubscriptionToken, TransactionHandler};
pub use transport::{MockTransport, SyncTransport};
