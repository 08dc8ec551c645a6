//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::oplog::TransactionLog;
use std::sync::Arc;
use tidesync_protocol::{
    validate_batch, BootstrapResponse, PullQuery, PullResponse, PushResponse, TransactionPayload,
};
use tracing::debug;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Transaction log (shared across all handlers).
    pub log: Arc<dyn TransactionLog>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, log: Arc<dyn TransactionLog>) -> Self {
        Self { config, log }
    }
}

/// Handler for sync requests.
///
/// Handlers are synchronous; the HTTP layer runs them on the blocking pool.
#[derive(Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the handler context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Handles `POST /transactions`.
    pub fn handle_push(&self, payloads: Vec<TransactionPayload>) -> ServerResult<PushResponse> {
        let max = self.context.config.max_push_batch;
        if payloads.len() > max {
            return Err(ServerError::BatchTooLarge {
                count: payloads.len(),
                max,
            });
        }

        let transactions = validate_batch(payloads)?;
        let count = transactions.len();
        let sync_id = self.context.log.append(transactions)?;
        debug!(count, sync_id, "push accepted");
        Ok(PushResponse::new(sync_id))
    }

    /// Handles `GET /transactions`.
    pub fn handle_pull(&self, query: PullQuery) -> ServerResult<PullResponse> {
        let from = query.from_or_default();
        let (entries, latest) = self.context.log.query_with_latest(from, query.to)?;
        let fallback = query.to.map_or(latest, |to| to.min(latest));
        let response = PullResponse::new(entries, fallback);
        debug!(from, to = ?query.to, returned = response.transactions.len(), "pull served");
        Ok(response)
    }

    /// Handles `GET /bootstrap`.
    pub fn handle_bootstrap(&self) -> ServerResult<BootstrapResponse> {
        let snapshot = self.context.log.snapshot()?;
        debug!(sync_id = snapshot.sync_id, records = snapshot.record_count(), "bootstrap served");
        Ok(snapshot.to_response())
    }
}
