use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Job not found")]
    NotFound,
    #[error("Video not ready yet")]
    NotReady,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    /// Only a download that arrived too early is worth repeating unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::NotReady)
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::NotReady => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Internal(detail) = self {
            log::error!("request failed: {detail}");
        }

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.public_message(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::Validation("bad".into()).status_code(), 400);
        assert_eq!(AppError::NotFound.status_code(), 404);
        assert_eq!(AppError::NotReady.status_code(), 400);
        assert_eq!(AppError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn only_not_ready_is_retryable() {
        assert!(AppError::NotReady.is_retryable());
        assert!(!AppError::NotFound.is_retryable());
        assert!(!AppError::Validation("x".into()).is_retryable());
        assert!(!AppError::Internal("x".into()).is_retryable());
    }

    #[actix_web::test]
    async fn internal_detail_is_not_leaked() {
        let resp = AppError::Internal("channel closed".into()).error_response();
        let body = to_bytes(resp.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(parsed.error, "Internal server error");
    }
}
