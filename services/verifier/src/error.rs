use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Message returned to callers that omit one of the signatures
pub const MISSING_SIGNATURES_MESSAGE: &str = "Both reference and test signatures are required";

/// Message returned for every internal failure
pub const PROCESSING_FAILED_MESSAGE: &str = "Error processing signatures";

/// Errors that can occur while serving a prediction
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Failed to stage artifact at {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Classifier timed out after {0:?}")]
    ClassifierTimeout(Duration),

    #[error("Classifier execution failed: {reason}")]
    ClassifierExecution { reason: String, stderr: String },

    #[error("Malformed classifier result: {reason}")]
    MalformedResult { reason: String, raw: String },
}

impl PredictionError {
    /// HTTP status for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            PredictionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PredictionError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::BadRequest(_) => "bad_request",
            PredictionError::PayloadTooLarge(_) => "payload_too_large",
            PredictionError::StorageWrite { .. } => "storage_write",
            PredictionError::ClassifierTimeout(_) => "classifier_timeout",
            PredictionError::ClassifierExecution { .. } => "classifier_execution",
            PredictionError::MalformedResult { .. } => "malformed_result",
        }
    }

    /// Message safe to show the caller
    ///
    /// Only client errors carry a specific message. Internal diagnostics
    /// (paths, stderr, raw output) never leave the process.
    pub fn public_message(&self) -> &str {
        match self {
            PredictionError::BadRequest(message) | PredictionError::PayloadTooLarge(message) => {
                message
            }
            _ => PROCESSING_FAILED_MESSAGE,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.public_message().to_string(),
            }),
        )
            .into_response()
    }
}
