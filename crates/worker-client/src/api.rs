//! REST client for the external analysis worker.
//!
//! The worker exposes a single trigger endpoint. It is invoked with the job
//! id, runs the analysis, and writes its progress back through the store; the
//! HTTP response only says whether the run was accepted.

use std::time::Duration;

use embryoscore_core::types::DbId;
use serde::{Deserialize, Serialize};

use crate::config::WorkerClientConfig;

/// Body of the trigger request.
#[derive(Debug, Serialize)]
struct TriggerRequest {
    queue_id: DbId,
}

/// Response returned by the worker trigger endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Errors from the worker REST layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkerApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker returned a non-2xx status code.
    #[error("Worker API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// HTTP client for the worker.
#[derive(Clone)]
pub struct WorkerApi {
    client: reqwest::Client,
    trigger_url: String,
    token: Option<String>,
}

impl WorkerApi {
    /// Build a client from configuration.
    pub fn new(config: &WorkerClientConfig) -> Result<Self, WorkerApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &WorkerClientConfig) -> Self {
        Self {
            client,
            trigger_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    /// Ask the worker to process `job_id`.
    ///
    /// Sends `POST {url}` with `{"queue_id": job_id}`. A `success: false`
    /// body is not an error here: the worker has already recorded the
    /// failure on the job.
    pub async fn trigger(&self, job_id: DbId) -> Result<TriggerResponse, WorkerApiError> {
        let mut request = self
            .client
            .post(&self.trigger_url)
            .json(&TriggerRequest { queue_id: job_id });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise return an
    /// [`WorkerApiError::ApiError`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, WorkerApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WorkerApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WorkerApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
