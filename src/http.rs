//! Retrying HTTP capability handed to plugins via [`PluginContext`].
//!
//! Two delivery disciplines, matching the plugin modes:
//!
//! - [`HttpClient::post_json`] waits for the response and retries on
//!   transport errors and 5xx responses (for `sync`-mode plugins).
//! - [`HttpClient::post_json_detached`] starts the request in a detached
//!   task, ignores the response and never retries (for `async`-mode
//!   plugins). This keeps async dispatch bounded in time.
//!
//! [`PluginContext`]: crate::plugin::PluginContext

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for HTTP requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries on 5xx or transport errors
const DEFAULT_RETRIES: u32 = 1;

/// Errors surfaced by the waiting delivery path.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Transport-level failure (connect, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server kept returning 5xx through every retry
    #[error("server error: {0}")]
    ServerError(StatusCode),
}

/// A JSON-posting HTTP client with bounded retries.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    retries: u32,
}

impl HttpClient {
    /// Create a client with default timeout and retry settings.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries on 5xx or transport errors.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// POST a JSON body and wait for the response.
    ///
    /// Retries on transport errors and 5xx responses. A 4xx response is
    /// returned as `Ok` without retrying; callers decide whether a client
    /// error is a failure.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Response, HttpError> {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.retries {
            if attempts > 0 {
                debug!(
                    attempt = attempts,
                    max_retries = self.retries,
                    url = %url,
                    "Retrying HTTP request"
                );
            }

            let result = self
                .client
                .post(url)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status.is_client_error() {
                        return Ok(response);
                    }

                    if status.is_server_error() {
                        warn!(
                            status = %status,
                            url = %url,
                            attempt = attempts,
                            "Request returned server error, will retry"
                        );
                        last_error = Some(HttpError::ServerError(status));
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %url,
                        attempt = attempts,
                        "HTTP request failed"
                    );
                    last_error = Some(HttpError::Transport(e));
                }
            }

            attempts += 1;
        }

        Err(last_error.unwrap_or(HttpError::ServerError(StatusCode::INTERNAL_SERVER_ERROR)))
    }

    /// POST a JSON body fire-and-forget: the request runs in a detached
    /// task, the response is ignored and nothing is retried. Failures are
    /// logged at debug level only.
    pub fn post_json_detached(&self, url: impl Into<String>, body: Value) {
        let client = self.client.clone();
        let timeout = self.timeout;
        let url = url.into();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).timeout(timeout).json(&body).send().await {
                debug!(error = %e, url = %url, "Detached HTTP request failed");
            }
        });
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
