//! HTTP transport implementation.
//!
//! Talks JSON to a TideSync server:
//! `POST /transactions`, `GET /transactions?from=&to=` and `GET /bootstrap`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tidesync_protocol::{
    BootstrapResponse, ErrorResponse, PullResponse, PushResponse, SyncId, Transaction,
};
use tracing::{debug, warn};

/// HTTP-based sync transport.
pub struct HttpTransport {
    /// Base URL of the sync server, without a trailing slash.
    base_url: String,
    client: Client,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Creates a transport from an engine configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(config.server_url.clone(), config.timeout)
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> SyncResult<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SyncError::Protocol(format!("failed to decode response: {}", e)));
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status_text(status),
        };
        Err(status_error(status, message))
    }
}

/// Maps an unsuccessful status to an error.
///
/// Only 400 and 422 say the writes themselves are unacceptable. 408, 429
/// and 5xx are worth retrying. Any other status points at a deployment
/// problem and fails the call without judging the writes.
fn status_error(status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Rejected(message),
        StatusCode::PAYLOAD_TOO_LARGE => SyncError::BatchTooLarge(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::transport_retryable(message)
        }
        status if status.is_server_error() => SyncError::ServerError(message),
        status => SyncError::Protocol(format!(
            "unexpected status {}: {}",
            status.as_u16(),
            message
        )),
    }
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn send_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_builder() {
        SyncError::transport_fatal(err.to_string())
    } else {
        SyncError::transport_retryable(err.to_string())
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, transactions: &[Transaction]) -> SyncResult<SyncId> {
        let result = async {
            let response = self
                .client
                .post(self.url("/transactions"))
                .json(transactions)
                .send()
                .await
                .map_err(send_error)?;
            let body: PushResponse = Self::decode(response).await?;
            Ok(body.sync_id)
        }
        .await;

        if let Err(e) = &result {
            warn!(count = transactions.len(), error = %e, "push failed");
        }
        self.record(result)
    }

    async fn pull(&self, from: SyncId, to: Option<SyncId>) -> SyncResult<PullResponse> {
        let path = match to {
            Some(to) => format!("/transactions?from={}&to={}", from, to),
            None => format!("/transactions?from={}", from),
        };
        debug!(from, ?to, "pull");

        let result = async {
            let response = self
                .client
                .get(self.url(&path))
                .send()
                .await
                .map_err(send_error)?;
            Self::decode(response).await
        }
        .await;
        self.record(result)
    }

    async fn bootstrap(&self) -> SyncResult<BootstrapResponse> {
        let result = async {
            let response = self
                .client
                .get(self.url("/bootstrap"))
                .send()
                .await
                .map_err(send_error)?;
            Self::decode(response).await
        }
        .await;
        self.record(result)
    }
}
