//! # Transcription Module
//!
//! Speech-to-text for uploaded audio files, Malayalam by default.
//!
//! ## Key Components:
//! - **engine**: The black-box contract (`SpeechEngine`, `EngineLoader`)
//! - **model**: Candle-rs Whisper implementation of that contract
//! - **service**: `Transcriber`, the lazily-loading adapter handlers talk to
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB
//! - **small**: ~244MB
//! - **medium**: ~769MB, the default; usable Malayalam accuracy
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;
pub mod service;

#[cfg(test)]
pub mod testing;

pub use engine::TranscriptionTask;
pub use model::WhisperLoader;
pub use service::{TranscriberError, TranscriberSettings, TranscriptOutcome, Transcriber};
