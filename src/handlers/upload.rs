//! # Audio Upload Handlers
//!
//! `POST /upload` (file field `audio`) and `POST /transcribe` (file field
//! `audio_data`) share one pipeline:
//!
//! 1. **Validate** the declared size, the file field, the filename and its extension
//! 2. **Persist** the body to transient storage
//! 3. **Transcribe** (and optionally translate) through the shared [`Transcriber`]
//! 4. **Clean up** the transient file, whatever happened in step 3, including
//!    the request being dropped mid-transcription
//!
//! Nothing touches disk until step 1 has passed.
//!
//! [`Transcriber`]: crate::transcription::Transcriber

use crate::error::{AppError, AppResult};
use crate::formatting::format_transcript;
use crate::state::{AppState, TranscriptionResult};
use crate::storage::{file_extension, StorageError, TransientFile};
use crate::transcription::{TranscriberError, TranscriptOutcome, TranscriptionTask};
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// File field read by `POST /upload`.
pub const UPLOAD_FIELD: &str = "audio";
/// File field read by `POST /transcribe`.
pub const TRANSCRIBE_FIELD: &str = "audio_data";

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub transcript: String,
    pub processing_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

pub async fn upload(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    handle_audio(req, payload, state, UPLOAD_FIELD).await
}

pub async fn transcribe(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    handle_audio(req, payload, state, TRANSCRIBE_FIELD).await
}

async fn handle_audio(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
    field_name: &str,
) -> AppResult<HttpResponse> {
    let start_time = Instant::now();
    let limit = state.config.upload.max_file_size_bytes;

    check_declared_size(&req, limit)?;

    let file = receive_upload(payload, &state, field_name, limit).await?;
    info!(
        original_name = %file.original_name,
        size_bytes = file.size_bytes,
        "Audio upload persisted"
    );

    // If this future is dropped before `discard`, dropping `file` removes it
    let result = run_transcription(&state, &file).await;
    state.store.discard(file).await;

    let (transcript, translation) = result?;
    let processing_time = format!("{:.2} seconds", start_time.elapsed().as_secs_f64());
    info!(processing_time = %processing_time, "Request processed");

    Ok(HttpResponse::Ok().json(TranscriptResponse {
        transcript: format_transcript(&transcript),
        processing_time,
        translation,
    }))
}

/// Reject a declared `Content-Length` above the limit before reading the body.
fn check_declared_size(req: &HttpRequest, limit: usize) -> AppResult<()> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    match declared {
        Some(length) if length > limit => {
            warn!(content_length = length, limit, "Upload rejected before reading");
            Err(AppError::PayloadTooLarge(limit))
        }
        _ => Ok(()),
    }
}

/// Find the file field, validate it and stream it to transient storage.
async fn receive_upload(
    mut payload: Multipart,
    state: &AppState,
    field_name: &str,
    limit: usize,
) -> AppResult<TransientFile> {
    while let Some(field) = payload.next().await {
        let field = match field {
            Ok(field) => field,
            Err(e) => {
                warn!(error = %e, "Unreadable multipart body");
                break;
            }
        };

        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => continue,
        };
        if name.as_deref() != Some(field_name) {
            continue;
        }

        let filename = filename.unwrap_or_default();
        if filename.trim().is_empty() {
            return Err(AppError::Validation("No selected file".to_string()));
        }
        check_extension(state, &filename)?;

        return state
            .store
            .persist(&filename, field, limit)
            .await
            .map_err(storage_error);
    }

    Err(AppError::Validation("No audio file provided".to_string()))
}

fn check_extension(state: &AppState, filename: &str) -> AppResult<()> {
    match file_extension(filename) {
        Some(ext) if state.config.is_allowed_extension(&ext) => Ok(()),
        Some(ext) => Err(AppError::Validation(format!("Unsupported file type: .{}", ext))),
        None => Err(AppError::Validation("File has no extension".to_string())),
    }
}

fn storage_error(err: StorageError) -> AppError {
    match err {
        StorageError::TooLarge { limit } => AppError::PayloadTooLarge(limit),
        StorageError::Stream(msg) => AppError::Validation(format!("Upload interrupted: {}", msg)),
        other => AppError::Storage(other.to_string()),
    }
}

/// Transcript plus optional translation for a persisted upload.
async fn run_transcription(
    state: &AppState,
    file: &TransientFile,
) -> AppResult<(String, Option<String>)> {
    let transcript = match state
        .transcriber
        .transcribe(&file.path, TranscriptionTask::Transcribe)
        .await
    {
        Ok(TranscriptOutcome::Text(text)) => text,
        Ok(TranscriptOutcome::NoSpeech) => {
            state.record_transcription(TranscriptionResult::NoSpeech);
            return Err(AppError::NoSpeechDetected);
        }
        Err(e) => return Err(engine_failure(state, e)),
    };

    let translation = if state.config.models.translate {
        match state
            .transcriber
            .transcribe(&file.path, TranscriptionTask::Translate)
            .await
        {
            Ok(TranscriptOutcome::Text(text)) => Some(text),
            Ok(TranscriptOutcome::NoSpeech) => Some(String::new()),
            Err(e) => return Err(engine_failure(state, e)),
        }
    } else {
        None
    };

    state.record_transcription(TranscriptionResult::Completed);
    Ok((transcript, translation))
}

fn engine_failure(state: &AppState, err: TranscriberError) -> AppError {
    state.record_transcription(TranscriptionResult::Failed);
    AppError::from(err)
}
