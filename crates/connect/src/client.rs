//! Shared HTTP client for both platform integrations.
//!
//! Calls walk an ordered list of path candidates so a provider-side API
//! version bump degrades into a fallback instead of an outage. Transient
//! failures retry with capped exponential backoff; a 429 fails the whole
//! call immediately.

use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;

use crate::error::{ConnectError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
/// Attempts per path candidate.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 60_000;

/// Error envelope both providers use for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

/// Per-call knobs; `Default` gives a plain GET-style call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Overrides [`DEFAULT_MAX_RETRIES`] when set.
    pub max_retries: Option<u32>,
}

/// Client for one provider's REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the provider API (e.g., "https://api.example.com")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create headers for an API request.
    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ConnectError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Perform a request against the first candidate that answers.
    ///
    /// Candidates are tried strictly in order. A 404 moves on to the next
    /// candidate; a 429 fails the whole call at once; any other failure
    /// retries the same candidate up to the per-candidate budget before
    /// advancing. When every candidate is exhausted the last failure is
    /// wrapped in [`ConnectError::AllEndpointsFailed`].
    pub async fn request(
        &self,
        token: &str,
        method: Method,
        path_candidates: &[&str],
        options: &RequestOptions,
    ) -> Result<Response> {
        if path_candidates.is_empty() {
            return Err(ConnectError::invalid_request("no path candidates given"));
        }
        let max_retries = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1);

        let mut last_error: Option<ConnectError> = None;
        for path in path_candidates {
            match self
                .try_candidate(token, method.clone(), path, options, max_retries)
                .await
            {
                Ok(response) => return Ok(response),
                Err(err @ ConnectError::RateLimited { .. }) => return Err(err),
                Err(ConnectError::NotFound { path }) => {
                    debug!("[Connect] {} not found, trying next candidate", path);
                    last_error = Some(ConnectError::NotFound { path });
                }
                Err(err) => {
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| ConnectError::invalid_request("no path candidates given"));
        Err(ConnectError::AllEndpointsFailed {
            last: Box::new(last),
        })
    }

    /// Perform a request and parse the JSON body of the response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        token: &str,
        method: Method,
        path_candidates: &[&str],
        options: &RequestOptions,
    ) -> Result<T> {
        let response = self
            .request(token, method, path_candidates, options)
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            ConnectError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    async fn try_candidate(
        &self,
        token: &str,
        method: Method,
        path: &str,
        options: &RequestOptions,
        max_retries: u32,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut retry_hint_secs: Option<u64> = None;
        let mut last_error: Option<ConnectError> = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay_ms = retry_hint_secs
                    .map(|secs| secs.saturating_mul(1_000))
                    .unwrap_or_else(|| backoff_delay_ms(attempt - 1));
                debug!(
                    "[Connect] Retry {}/{} for {} in {} ms",
                    attempt + 1,
                    max_retries,
                    path,
                    delay_ms
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }

            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.headers(token)?);
            if !options.query.is_empty() {
                request = request.query(&options.query);
            }
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!("[Connect] {} {} transport error: {}", method, path, err);
                    last_error = Some(ConnectError::Http(err));
                    retry_hint_secs = None;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                // Retrying into an exhausted quota burns it further. The
                // whole call fails; the next cycle starts fresh.
                let hint = parse_retry_after(&response);
                warn!(
                    "[Connect] {} {} rate limited (retry after {:?}s)",
                    method, path, hint
                );
                return Err(ConnectError::RateLimited {
                    retry_after_secs: hint,
                });
            }
            if status == StatusCode::NOT_FOUND {
                // Wrong path for this provider version, not a transient
                // error.
                return Err(ConnectError::not_found(path));
            }

            retry_hint_secs = parse_retry_after(&response);
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    last_error = Some(ConnectError::Http(err));
                    continue;
                }
            };
            Self::log_response(status, &body);

            let err = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(parsed) => ConnectError::api(
                    status.as_u16(),
                    format!("{}: {}", parsed.code, parsed.message),
                ),
                Err(_) => ConnectError::api(status.as_u16(), format!("Request failed: {}", body)),
            };
            warn!("[Connect] {} {} failed: {}", method, path, err);
            last_error = Some(err);
        }

        Err(last_error.unwrap_or_else(|| ConnectError::invalid_request("retry budget of zero")))
    }
}

/// Exponential backoff per retry attempt, capped at one minute.
fn backoff_delay_ms(attempt: u32) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(1_u64 << attempt.min(16))
        .min(BACKOFF_CAP_MS)
}

/// Delta-seconds form only; HTTP-date values are ignored.
fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}
