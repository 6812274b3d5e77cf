//! # Error Handling
//!
//! Every failure a request can hit is expressed as an [`AppError`] variant and
//! converted into an HTTP response at the handler boundary.
//!
//! ## Wire format
//! All error responses share one shape:
//! ```json
//! { "error": "Failed to transcribe audio: decoder: shape mismatch" }
//! ```
//! The client message never contains filesystem paths or backtraces. The full
//! detail (including the internal cause where one exists) is logged
//! server-side when the response is built.
//!
//! ## Status mapping
//! - **Validation / NoSpeechDetected** → 400
//! - **AudioNotFound / NotFound** → 404
//! - **PayloadTooLarge** → 413
//! - **Storage / EngineLoad / Transcription / Internal** → 500
//!
//! `NoSpeechDetected` is not a failure of the service. It reports that the
//! engine ran and found nothing to transcribe. It goes through the error path
//! anyway because clients expect a 400 for it.

use crate::transcription::TranscriberError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing upload (no file field, empty filename, bad extension)
    Validation(String),

    /// Upload larger than the configured maximum (limit in bytes)
    PayloadTooLarge(usize),

    /// The upload could not be written to transient storage
    Storage(String),

    /// The engine ran but produced no text
    NoSpeechDetected,

    /// The transient file vanished before the engine could read it
    AudioNotFound,

    /// The transcription model failed to initialize (detail is logged only)
    EngineLoad(String),

    /// The engine call itself failed
    Transcription(String),

    /// Unknown route
    NotFound,

    /// Anything else that should never happen
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::PayloadTooLarge(limit) => write!(f, "Payload too large (limit {} bytes)", limit),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::NoSpeechDetected => write!(f, "No speech detected"),
            AppError::AudioNotFound => write!(f, "Audio file not found"),
            AppError::EngineLoad(msg) => write!(f, "Engine load error: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription error: {}", msg),
            AppError::NotFound => write!(f, "Not found"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    /// The message returned to the client in the `error` field.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::PayloadTooLarge(limit) if limit % (1024 * 1024) == 0 => {
                format!("File too large (max {}MB)", limit / (1024 * 1024))
            }
            AppError::PayloadTooLarge(limit) => format!("File too large (max {} bytes)", limit),
            AppError::Storage(msg) => format!("Failed to save audio file: {}", msg),
            AppError::NoSpeechDetected => "No speech detected in the audio".to_string(),
            AppError::AudioNotFound => "Audio file not found".to_string(),
            // Distinct from generic failures so operators can tell infrastructure
            // issues from content issues.
            AppError::EngineLoad(_) => "Error loading transcription model".to_string(),
            AppError::Transcription(msg) => format!("Failed to transcribe audio: {}", msg),
            AppError::NotFound => "Not found".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::NoSpeechDetected => StatusCode::BAD_REQUEST,
            AppError::AudioNotFound | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Storage(_)
            | AppError::EngineLoad(_)
            | AppError::Transcription(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        HttpResponse::build(status).json(json!({ "error": self.client_message() }))
    }
}

impl From<TranscriberError> for AppError {
    fn from(err: TranscriberError) -> Self {
        match err {
            TranscriberError::AudioNotFound(_) => AppError::AudioNotFound,
            TranscriberError::EngineLoad(msg) => AppError::EngineLoad(msg),
            TranscriberError::Transcription(msg) => AppError::Transcription(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
