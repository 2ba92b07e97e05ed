use std::path::Path;
use std::time::Duration;

use actix_web::{web::Bytes, HttpMessage};
use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::error::ErrorResponse;
use crate::models::{build_path, GenerationRequest, JobHandle, Locator, Status, StatusView};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("{0}")]
    JobFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Transport failures and server-side errors may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(_) => true,
            ClientError::Status { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

#[async_trait(?Send)]
pub trait StatusSource {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusView, ClientError>;
}

pub struct ApiClient {
    base_url: String,
    http: awc::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        ApiClient {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: awc::Client::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<JobHandle, ClientError> {
        let mut res = self
            .http
            .post(self.url("/generate"))
            .send_json(request)
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let body = res.body().await.unwrap_or_default();
            return Err(status_error(res.status().as_u16(), &body));
        }

        res.json::<JobHandle>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusView, ClientError> {
        let mut res = self
            .http
            .get(self.url(&build_path(job_id, Locator::Status)))
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let body = res.body().await.unwrap_or_default();
            return Err(status_error(res.status().as_u16(), &body));
        }

        res.json::<StatusView>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn download(&self, job_id: &str) -> Result<Bytes, ClientError> {
        let mut res = self
            .http
            .get(self.url(&build_path(job_id, Locator::Download)))
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let body = res
            .body()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        if !res.status().is_success() {
            return Err(status_error(res.status().as_u16(), &body));
        }

        Ok(body)
    }

    /// Streams the artifact into `path` chunk by chunk.
    pub async fn download_to(&self, job_id: &str, path: &Path) -> Result<u64, ClientError> {
        let mut res = self
            .http
            .get(self.url(&build_path(job_id, Locator::Download)))
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let body = res.body().await.unwrap_or_default();
            return Err(status_error(res.status().as_u16(), &body));
        }

        let mut stream = res.take_payload();
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::Request(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;

        Ok(written)
    }
}

#[async_trait(?Send)]
impl StatusSource for ApiClient {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusView, ClientError> {
        self.status(job_id).await
    }
}

fn status_error(code: u16, body: &[u8]) -> ClientError {
    let message = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.is_empty() => "Request failed".to_owned(),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };

    ClientError::Status { code, message }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Stop at the first failed query.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn backoff(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Upper bound of the wait before retry number `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered wait in `[ceiling / 2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        rand::thread_rng().gen_range(ceiling / 2..=ceiling)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Done,
}

/// Queries a job's status on a fixed interval until it reaches a terminal state.
pub struct Poller<S> {
    source: S,
    interval: Duration,
    retry: RetryPolicy,
    state: PollerState,
    latest: Option<StatusView>,
}

impl<S: StatusSource> Poller<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Poller {
            source,
            interval,
            retry: RetryPolicy::none(),
            state: PollerState::Idle,
            latest: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn latest(&self) -> Option<&StatusView> {
        self.latest.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Polls `job_id`, calling `on_update` with every view received. Resolves with the
    /// completed view, or an error if a query fails or the job itself failed.
    pub async fn run<F>(
        &mut self,
        job_id: &str,
        mut on_update: F,
    ) -> Result<StatusView, ClientError>
    where
        F: FnMut(&StatusView),
    {
        self.state = PollerState::Polling;

        loop {
            let view = match self.query(job_id).await {
                Ok(view) => view,
                Err(err) => {
                    log::warn!("[{}] poller: giving up: {}", job_id, err);
                    self.state = PollerState::Done;
                    return Err(err);
                }
            };

            on_update(&view);
            self.latest = Some(view.clone());

            match view.status {
                Status::Completed => {
                    self.state = PollerState::Done;
                    return Ok(view);
                }
                Status::Failed => {
                    self.state = PollerState::Done;
                    let message = view
                        .error_message
                        .unwrap_or_else(|| "Generation failed".to_owned());
                    return Err(ClientError::JobFailed(message));
                }
                Status::Pending | Status::Processing => {
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    async fn query(&self, job_id: &str) -> Result<StatusView, ClientError> {
        let mut attempt = 0;

        loop {
            match self.source.fetch_status(job_id).await {
                Ok(view) => return Ok(view),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let wait = self.retry.delay(attempt);
                    log::debug!(
                        "[{}] poller: {} (retry {} in {:?})",
                        job_id,
                        err,
                        attempt + 1,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
