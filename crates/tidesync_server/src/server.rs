//! Main sync server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::oplog::{MemoryTransactionLog, TransactionLog};
use crate::routes::router;
use crate::sqlite::SqliteTransactionLog;
use axum::Router;
use std::sync::Arc;
use tidesync_protocol::{
    BootstrapResponse, PullQuery, PullResponse, PushResponse, SyncId, TransactionPayload,
};
use tokio::net::TcpListener;
use tracing::info;

/// The sync server.
///
/// Owns the transaction log and exposes the push, pull and bootstrap
/// operations either directly or over HTTP.
///
/// # Example
///
/// ```
/// use tidesync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.latest().unwrap(), 0);
/// ```
#[derive(Clone)]
pub struct SyncServer {
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a sync server with an in-memory log.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_log(config, Arc::new(MemoryTransactionLog::new()))
    }

    /// Creates a sync server with the log named by the config.
    ///
    /// Opens a SQLite log when `database_path` is set, otherwise keeps the
    /// log in memory.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let log: Arc<dyn TransactionLog> = match &config.database_path {
            Some(path) => Arc::new(SqliteTransactionLog::open(path)?),
            None => Arc::new(MemoryTransactionLog::new()),
        };
        Ok(Self::with_log(config, log))
    }

    /// Creates a sync server with an existing log.
    pub fn with_log(config: ServerConfig, log: Arc<dyn TransactionLog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, log));
        Self {
            handler: RequestHandler::new(context),
        }
    }

    /// Handles a push.
    pub fn handle_push(&self, payloads: Vec<TransactionPayload>) -> ServerResult<PushResponse> {
        self.handler.handle_push(payloads)
    }

    /// Handles a pull.
    pub fn handle_pull(&self, query: PullQuery) -> ServerResult<PullResponse> {
        self.handler.handle_pull(query)
    }

    /// Handles a bootstrap.
    pub fn handle_bootstrap(&self) -> ServerResult<BootstrapResponse> {
        self.handler.handle_bootstrap()
    }

    /// Returns the highest assigned sync id.
    pub fn latest(&self) -> ServerResult<SyncId> {
        self.handler.context().log.latest()
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.handler.context().config
    }

    /// Returns the HTTP router for this server.
    pub fn router(&self) -> Router {
        router(self.handler.clone())
    }

    /// Binds the configured address and serves HTTP until the task is dropped.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config().bind_addr).await?;
        info!(addr = %listener.local_addr()?, "sync server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
