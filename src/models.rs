use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

pub const MIN_LENGTH_SECONDS: u32 = 1;
pub const MAX_LENGTH_SECONDS: u32 = 30;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;
pub const DEFAULT_DIMENSION: u32 = 512;

pub const OUTPUT_FILE: &str = "output.mp4";
pub const ARTIFACT_EXTENSION: &str = "mp4";
pub const ARTIFACT_CONTENT_TYPE: &str = "video/mp4";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parameters {
    pub duration_seconds: u32,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Body of `POST /generate`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: String,
    pub length_seconds: i64,
    pub fps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: &str, length_seconds: i64, fps: i64) -> Self {
        GenerationRequest {
            prompt: prompt.to_owned(),
            length_seconds,
            fps,
            width: None,
            height: None,
            seed: None,
        }
    }

    /// Checks the request and resolves it into the job's immutable parameters.
    pub fn validate(&self) -> Result<Parameters, AppError> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt is required".to_owned()));
        }

        let length = in_range(self.length_seconds, MIN_LENGTH_SECONDS, MAX_LENGTH_SECONDS)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Length must be between {MIN_LENGTH_SECONDS}-{MAX_LENGTH_SECONDS} seconds"
                ))
            })?;

        let fps = in_range(self.fps, MIN_FPS, MAX_FPS).ok_or_else(|| {
            AppError::Validation(format!("FPS must be between {MIN_FPS}-{MAX_FPS}"))
        })?;

        Ok(Parameters {
            duration_seconds: length,
            frame_rate: fps,
            width: dimension_or_default(self.width),
            height: dimension_or_default(self.height),
            seed: self.seed,
        })
    }
}

fn in_range(value: i64, min: u32, max: u32) -> Option<u32> {
    if value < i64::from(min) || value > i64::from(max) {
        return None;
    }
    u32::try_from(value).ok()
}

fn dimension_or_default(value: Option<u32>) -> u32 {
    match value {
        Some(0) | None => DEFAULT_DIMENSION,
        Some(v) => v,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub parameters: Parameters,
    pub status: Status,
    pub progress: u8,
    pub ready: bool,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(
        id: String,
        prompt: String,
        parameters: Parameters,
        created_at: DateTime<Utc>,
    ) -> Self {
        Job {
            id,
            prompt,
            parameters,
            status: Status::Pending,
            progress: 0,
            ready: false,
            files: vec![],
            created_at,
            completed_at: None,
            error_message: None,
        }
    }

    /// Applies `update` in place, or leaves the job untouched and reports why not.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let mut next = self.clone();

        if let Some(status) = update.status {
            if status < next.status {
                return Err(TransitionError::Regression {
                    from: next.status,
                    to: status,
                });
            }
            next.status = status;
        }

        if let Some(progress) = update.progress {
            if progress < next.progress {
                return Err(TransitionError::ProgressDecrease {
                    from: next.progress,
                    to: progress,
                });
            }
            next.progress = progress;
        }

        if let Some(files) = &update.files {
            next.files = files.clone();
        }

        if let Some(message) = &update.error_message {
            next.error_message = Some(message.clone());
        }

        next.ready = next.status == Status::Completed;
        if next.status.is_terminal() {
            next.completed_at = Some(now);
        }

        next.check_invariants()?;
        *self = next;

        Ok(())
    }

    fn check_invariants(&self) -> Result<(), TransitionError> {
        let completed = self.status == Status::Completed;
        let failed = self.status == Status::Failed;

        if self.progress > 100 {
            return Err(TransitionError::Invariant("progress above 100"));
        }
        if (self.progress == 100) != completed {
            return Err(TransitionError::Invariant("progress is 100 only when completed"));
        }
        if self.files.is_empty() == completed {
            return Err(TransitionError::Invariant("files are present only when completed"));
        }
        if self.error_message.is_some() != failed {
            return Err(TransitionError::Invariant("error message is present only when failed"));
        }

        Ok(())
    }

    pub fn status_view(&self) -> StatusView {
        StatusView {
            job_id: self.id.clone(),
            ready: self.ready,
            status: self.status,
            progress: self.progress,
            files: self.files.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
        }
    }
}

/// Partial set of fields merged into a stored job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<Status>,
    pub progress: Option<u8>,
    pub files: Option<Vec<String>>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn processing(progress: u8) -> Self {
        JobUpdate {
            status: Some(Status::Processing),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(files: Vec<String>) -> Self {
        JobUpdate {
            status: Some(Status::Completed),
            progress: Some(100),
            files: Some(files),
            ..Default::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        JobUpdate {
            status: Some(Status::Failed),
            error_message: Some(message.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("job is already {0:?}")]
    Terminal(Status),
    #[error("status cannot go from {from:?} back to {to:?}")]
    Regression { from: Status, to: Status },
    #[error("progress cannot decrease from {from} to {to}")]
    ProgressDecrease { from: u8, to: u8 },
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusView {
    pub job_id: String,
    pub ready: bool,
    pub status: Status,
    pub progress: u8,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub status_url: String,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

pub enum Locator {
    Status,
    Download,
}

pub fn build_path(id: &str, locator: Locator) -> String {
    match locator {
        Locator::Status => format!("/status/{id}"),
        Locator::Download => format!("/download/{id}"),
    }
}

pub fn artifact_filename(id: &str) -> String {
    format!("{id}.{ARTIFACT_EXTENSION}")
}
