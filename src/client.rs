//! Client for the remote shrink API.
//!
//! Every image costs two calls: an authenticated `POST` of the raw bytes, which
//! answers with a JSON envelope pointing at the result, and a `GET` of that
//! result. Both calls retry transient failures with exponential backoff and
//! give up immediately on anything the server will keep rejecting.

use crate::constants::{
    API_URL, BASE_RETRY_DELAY, MAX_FILE_SIZE, MAX_RETRIES, SAMPLE_PNG, REQUEST_TIMEOUT,
};
use crate::error::{CompressionError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Readable body of a compressed result. Dropping it closes the connection.
pub type ResultStream = Pin<Box<dyn AsyncRead + Send>>;

/// Outcome of a successful [`Shrinker::compress`] call.
pub struct Compressed {
    pub body: ResultStream,
    /// Size reported by the API for the optimized image.
    pub compressed_size: u64,
    /// Size of the input as measured locally.
    pub original_size: u64,
}

impl std::fmt::Debug for Compressed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressed")
            .field("compressed_size", &self.compressed_size)
            .field("original_size", &self.original_size)
            .finish_non_exhaustive()
    }
}

/// Anything that can turn an image byte stream into a compressed one.
#[async_trait]
pub trait Shrinker: Send + Sync {
    async fn compress(
        &self,
        cancel: &CancellationToken,
        input: &mut (dyn AsyncRead + Send + Unpin),
        display_name: &str,
    ) -> Result<Compressed>;
}

/// Retry schedule shared by the upload and download calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: BASE_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait before the given attempt; attempt 0 is the initial call.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShrinkOutput {
    pub size: u64,
    pub url: String,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShrinkResponse {
    pub output: ShrinkOutput,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// Races `fut` against the cancellation signal.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CompressionError::Cancelled),
        out = fut => Ok(out),
    }
}

#[derive(Clone)]
pub struct ShrinkClient {
    api_key: String,
    endpoint: String,
    retry: RetryPolicy,
    max_file_size: u64,
    http: reqwest::Client,
}

impl std::fmt::Debug for ShrinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShrinkClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ShrinkClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tiny-squeeze/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            endpoint: API_URL.to_string(),
            retry: RetryPolicy::default(),
            max_file_size: MAX_FILE_SIZE,
            http,
        })
    }

    /// Points the client at a different shrink endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Largest input accepted for upload, in bytes.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Compresses a tiny built-in image purely to surface auth failures early.
    pub async fn validate_key(&self, cancel: &CancellationToken) -> Result<()> {
        let mut sample = SAMPLE_PNG;
        let compressed = self.compress(cancel, &mut sample, "sample.png").await?;
        debug!(
            compressed_size = compressed.compressed_size,
            "API key accepted"
        );
        Ok(())
    }

    async fn backoff(
        &self,
        cancel: &CancellationToken,
        attempt: u32,
        operation: &str,
    ) -> Result<()> {
        let delay = self.retry.delay_before(attempt);
        warn!(
            "Retrying {}... ({}/{}) after {:?}",
            operation, attempt, self.retry.max_retries, delay
        );
        cancellable(cancel, tokio::time::sleep(delay)).await
    }

    async fn shrink_with_retry(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<ShrinkResponse> {
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                self.backoff(cancel, attempt, "upload").await?;
            }

            let request = self
                .http
                .post(&self.endpoint)
                .basic_auth(&self.api_key, None::<&str>)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(payload.to_vec());

            let response = match cancellable(cancel, request.send()).await? {
                Ok(response) => response,
                Err(err) => {
                    debug!(error = %err, attempt, "Upload request failed");
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(api_error(cancel, status, response).await);
            }
            if status.is_server_error() {
                debug!(%status, attempt, "Shrink endpoint returned a server error");
                continue;
            }
            if status.is_client_error() {
                return Err(api_error(cancel, status, response).await);
            }
            if !status.is_success() {
                return Err(CompressionError::InvalidResponse(format!(
                    "unexpected status {}",
                    status
                )));
            }

            let body = cancellable(cancel, response.bytes()).await??;
            return serde_json::from_slice(&body)
                .map_err(|e| CompressionError::InvalidResponse(e.to_string()));
        }

        Err(CompressionError::MaxRetriesExceeded("upload"))
    }

    async fn download_with_retry(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<ResultStream> {
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                self.backoff(cancel, attempt, "download").await?;
            }

            let response = match cancellable(cancel, self.http.get(url).send()).await? {
                Ok(response) => response,
                Err(err) => {
                    debug!(error = %err, attempt, "Download request failed");
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::OK {
                let stream = response.bytes_stream().map_err(io::Error::other);
                return Ok(Box::pin(StreamReader::new(stream)));
            }
            if status.is_server_error() {
                debug!(%status, attempt, "Result download returned a server error");
                continue;
            }
            return Err(CompressionError::DownloadFailed(status.as_u16()));
        }

        Err(CompressionError::MaxRetriesExceeded("download"))
    }
}

async fn api_error(
    cancel: &CancellationToken,
    status: StatusCode,
    response: reqwest::Response,
) -> CompressionError {
    let body = match cancellable(cancel, response.bytes()).await {
        Ok(Ok(bytes)) => serde_json::from_slice::<ApiErrorBody>(&bytes).unwrap_or_default(),
        Ok(Err(_)) => ApiErrorBody::default(),
        Err(cancelled) => return cancelled,
    };

    CompressionError::Api {
        status: status.as_u16(),
        code: body.error,
        message: body.message,
    }
}

#[async_trait]
impl Shrinker for ShrinkClient {
    async fn compress(
        &self,
        cancel: &CancellationToken,
        input: &mut (dyn AsyncRead + Send + Unpin),
        display_name: &str,
    ) -> Result<Compressed> {
        // One byte past the limit is enough to tell an oversized input apart.
        let mut payload = Vec::new();
        let mut limited = (&mut *input).take(self.max_file_size.saturating_add(1));
        cancellable(cancel, limited.read_to_end(&mut payload)).await??;

        let original_size = payload.len() as u64;
        if original_size > self.max_file_size {
            return Err(CompressionError::FileTooLarge(
                original_size,
                self.max_file_size,
            ));
        }

        debug!(file = display_name, original_size, "Uploading for shrink");
        let shrunk = self.shrink_with_retry(cancel, &payload).await?;

        debug!(
            file = display_name,
            compressed_size = shrunk.output.size,
            "Downloading shrink result"
        );
        let body = self.download_with_retry(cancel, &shrunk.output.url).await?;

        Ok(Compressed {
            body,
            compressed_size: shrunk.output.size,
            original_size,
        })
    }
}
