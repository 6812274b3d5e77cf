//! # Speech Engine Contract
//!
//! The service treats the speech model as a black box with a fixed call
//! contract: give it a file path plus language and task selectors, get back a
//! result that may or may not carry text. Everything about how the model
//! works lives behind these two traits, which keeps request handling testable
//! without model weights.
//!
//! ## Blocking by contract
//! Both `EngineLoader::load` and `SpeechEngine::transcribe` are synchronous and
//! may take seconds to minutes. Callers (see `service.rs`) run them on tokio's
//! blocking pool.

use crate::transcription::model::ModelSize;
use candle_core::Device;
use std::path::Path;
use std::sync::Arc;

/// What the engine should produce from the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionTask {
    /// Text in the spoken language
    Transcribe,
    /// English text
    Translate,
}

impl TranscriptionTask {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptionTask::Transcribe => "transcribe",
            TranscriptionTask::Translate => "translate",
        }
    }
}

/// Selectors passed to the engine for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    /// ISO 639-1 language code ("ml")
    pub language: String,
    pub task: TranscriptionTask,
}

/// Raw engine result.
///
/// `text` is `None` when the engine produced no text field at all, which the
/// service treats the same as empty text: no speech, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub text: Option<String>,
}

/// A loaded speech-to-text model.
pub trait SpeechEngine: Send + Sync {
    fn transcribe(&self, audio_path: &Path, request: &DecodeRequest) -> anyhow::Result<EngineOutput>;
}

/// Builds a [`SpeechEngine`] on a selected device.
pub trait EngineLoader: Send + Sync {
    fn load(&self, size: ModelSize, device: Device) -> anyhow::Result<Arc<dyn SpeechEngine>>;
}
