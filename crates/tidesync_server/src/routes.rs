//! HTTP routes for the sync API.

use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::future::Future;
use std::time::Duration;
use tidesync_protocol::{
    BootstrapResponse, ErrorResponse, PullQuery, PullResponse, PushResponse, TransactionPayload,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Builds the sync API router.
///
/// - `POST /transactions`: append a batch
/// - `GET /transactions?from&to`: read a range of the log
/// - `GET /bootstrap`: current state with its sync id
/// - `GET /health`: liveness
pub fn router(handler: RequestHandler) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transactions", get(pull).post(push))
        .route("/bootstrap", get(bootstrap))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            debug!(error = %self, "request rejected");
            match self {
                ServerError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            }
        } else {
            error!(error = %self, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn push(
    State(handler): State<RequestHandler>,
    body: Result<Json<Vec<TransactionPayload>>, JsonRejection>,
) -> ServerResult<Json<PushResponse>> {
    let Json(payloads) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    // Not bounded by the request timeout: an append that commits must report its sync id.
    run_blocking(handler, move |h| h.handle_push(payloads))
        .await
        .map(Json)
}

async fn pull(
    State(handler): State<RequestHandler>,
    query: Result<Query<PullQuery>, QueryRejection>,
) -> ServerResult<Json<PullResponse>> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let timeout = handler.context().config.request_timeout;
    bounded(timeout, run_blocking(handler, move |h| h.handle_pull(query)))
        .await
        .map(Json)
}

async fn bootstrap(State(handler): State<RequestHandler>) -> ServerResult<Json<BootstrapResponse>> {
    let timeout = handler.context().config.request_timeout;
    bounded(timeout, run_blocking(handler, |h| h.handle_bootstrap()))
        .await
        .map(Json)
}

/// Runs a handler on the blocking pool and waits for it to finish.
async fn run_blocking<T, F>(handler: RequestHandler, f: F) -> ServerResult<T>
where
    F: FnOnce(&RequestHandler) -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&handler))
        .await
        .map_err(|join| ServerError::Internal(join.to_string()))?
}

/// Bounds a read-only request by the request timeout.
async fn bounded<T>(
    timeout: Duration,
    read: impl Future<Output = ServerResult<T>>,
) -> ServerResult<T> {
    tokio::time::timeout(timeout, read).await.map_err(|_| {
        ServerError::Internal(format!("request timed out after {:?}", timeout))
    })?
}
