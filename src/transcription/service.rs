//! # Transcription Service
//!
//! The adapter between request handlers and the speech engine. It owns the
//! engine's lifecycle and exposes one typed operation, [`Transcriber::transcribe`].
//!
//! ## Lifecycle
//! The engine is loaded lazily on first use and at most once per process. The
//! load goes through `tokio::sync::OnceCell::get_or_try_init`: concurrent
//! first callers wait on the same initialization instead of each loading a
//! model. The load itself is a detached blocking task, so cancelling the
//! caller that started it does not abandon it. A failed load leaves the cell
//! empty. The failure is returned to the caller that observed it, and the
//! next call tries again.
//!
//! ## Concurrency
//! Engine calls block, so they run on `spawn_blocking`. A semaphore bounds how
//! many run at once (`performance.max_concurrent_transcriptions`, default 1),
//! which keeps parallel requests from fighting over one accelerator. There is
//! no timeout. A hung engine call holds its permit until it returns.

use crate::config::AppConfig;
use crate::device::{DeviceKind, DeviceManager, DevicePreference};
use crate::transcription::engine::{DecodeRequest, EngineLoader, SpeechEngine, TranscriptionTask};
use crate::transcription::model::ModelSize;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Typed failures of the transcription adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscriberError {
    /// The audio path did not exist when transcription started
    #[error("audio file not found: {}", .0.display())]
    AudioNotFound(PathBuf),

    /// The model could not be initialized
    #[error("failed to load speech model: {0}")]
    EngineLoad(String),

    /// The engine call failed; carries the engine's message
    #[error("{0}")]
    Transcription(String),
}

/// Successful adapter result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// Whitespace-trimmed, non-empty engine text
    Text(String),
    /// The engine ran but returned no text
    NoSpeech,
}

/// The loaded engine plus where it runs.
#[derive(Clone)]
pub struct EngineHandle {
    pub engine: Arc<dyn SpeechEngine>,
    pub device: DeviceKind,
    pub device_name: String,
    pub model: ModelSize,
}

/// Settings the adapter needs from the application configuration.
#[derive(Debug, Clone)]
pub struct TranscriberSettings {
    pub model: ModelSize,
    pub device: DevicePreference,
    pub language: String,
    pub max_concurrent: usize,
}

impl TranscriberSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            model: config.models.whisper_model.parse()?,
            device: config
                .models
                .device
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            language: config.models.language.clone(),
            max_concurrent: config.performance.max_concurrent_transcriptions.max(1),
        })
    }
}

type LoadTask = JoinHandle<Result<EngineHandle>>;

/// Process-wide transcription adapter, shared through `AppState`.
pub struct Transcriber {
    loader: Arc<dyn EngineLoader>,
    settings: TranscriberSettings,
    handle: OnceCell<EngineHandle>,
    /// The in-flight load, kept outside any caller's future
    pending_load: Mutex<Option<LoadTask>>,
    permits: Semaphore,
}

impl Transcriber {
    pub fn new(loader: Arc<dyn EngineLoader>, settings: TranscriberSettings) -> Self {
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Self {
            loader,
            settings,
            handle: OnceCell::new(),
            pending_load: Mutex::new(None),
            permits,
        }
    }

    pub fn settings(&self) -> &TranscriberSettings {
        &self.settings
    }

    /// The engine handle if a load has already succeeded.
    pub fn loaded(&self) -> Option<&EngineHandle> {
        self.handle.get()
    }

    /// Load the engine unless it already is. Idempotent.
    ///
    /// The load runs on the blocking pool as its own task. A caller that is
    /// dropped while waiting (client disconnect, timeout) leaves that task
    /// running and parked in `pending_load`, where the next caller picks it
    /// up instead of starting a second load.
    pub async fn ensure_loaded(&self) -> Result<&EngineHandle, TranscriberError> {
        self.handle.get_or_try_init(|| self.await_load()).await
    }

    async fn await_load(&self) -> Result<EngineHandle, TranscriberError> {
        let model = self.settings.model;
        let mut pending = self.pending_load.lock().await;

        if pending.is_some() {
            info!(model = %model, "Joining speech model load already in progress");
        }
        let task = pending.get_or_insert_with(|| self.spawn_load());
        let start_time = Instant::now();
        let joined = task.await;
        *pending = None;

        match joined {
            Ok(Ok(handle)) => {
                info!(
                    model = %model,
                    device = %handle.device,
                    waited_secs = start_time.elapsed().as_secs_f64(),
                    "Speech model loaded"
                );
                Ok(handle)
            }
            Ok(Err(e)) => {
                error!(model = %model, error = %format!("{:#}", e), "Error loading speech model");
                Err(TranscriberError::EngineLoad(format!("{:#}", e)))
            }
            Err(join_error) => {
                error!(model = %model, error = %join_error, "Speech model loader panicked");
                Err(TranscriberError::EngineLoad(join_error.to_string()))
            }
        }
    }

    fn spawn_load(&self) -> LoadTask {
        let loader = Arc::clone(&self.loader);
        let model = self.settings.model;
        let preference = self.settings.device;

        info!(model = %model, device = ?preference, "Loading speech model");

        tokio::task::spawn_blocking(move || {
            let device = DeviceManager::get_device(preference);
            let kind = DeviceKind::of(&device);
            let device_name = DeviceManager::get_device_info(&device);
            loader
                .load(model, device)
                .map(|engine| EngineHandle { engine, device: kind, device_name, model })
        })
    }

    /// Transcribe (or translate) the audio file at `path`.
    ///
    /// ## Returns:
    /// - **Ok(Text)**: trimmed, non-empty text
    /// - **Ok(NoSpeech)**: the engine produced no text or only whitespace
    /// - **Err(AudioNotFound)**: `path` is not an existing file
    /// - **Err(EngineLoad)**: the model could not be loaded
    /// - **Err(Transcription)**: the engine call failed
    pub async fn transcribe(
        &self,
        path: &Path,
        task: TranscriptionTask,
    ) -> Result<TranscriptOutcome, TranscriberError> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {
                info!(path = %path.display(), size_bytes = metadata.len(), "Audio file exists");
            }
            _ => {
                error!(path = %path.display(), "Audio file not found");
                return Err(TranscriberError::AudioNotFound(path.to_path_buf()));
            }
        }

        let handle = self.ensure_loaded().await?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TranscriberError::Transcription(e.to_string()))?;

        let engine = Arc::clone(&handle.engine);
        let request = DecodeRequest {
            language: self.settings.language.clone(),
            task,
        };
        let audio_path = path.to_path_buf();
        let start_time = Instant::now();

        info!(path = %path.display(), task = task.as_str(), language = %request.language, "Starting transcription");

        let output = tokio::task::spawn_blocking(move || engine.transcribe(&audio_path, &request))
            .await
            .map_err(|e| TranscriberError::Transcription(e.to_string()))?
            .map_err(|e| {
                error!(path = %path.display(), error = %format!("{:#}", e), "Error during transcription");
                TranscriberError::Transcription(e.to_string())
            })?;

        let text = match output.text {
            Some(text) => text.trim().to_string(),
            None => {
                warn!("No text field in transcription result");
                String::new()
            }
        };

        if text.is_empty() {
            warn!(path = %path.display(), "Transcription returned no speech");
            return Ok(TranscriptOutcome::NoSpeech);
        }

        info!(
            task = task.as_str(),
            chars = text.chars().count(),
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            "Transcription successful"
        );
        Ok(TranscriptOutcome::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::testing::{ScriptedLoader, ScriptedReply};

    fn settings() -> TranscriberSettings {
        TranscriberSettings {
            model: ModelSize::Medium,
            device: DevicePreference::Cpu,
            language: "ml".to_string(),
            max_concurrent: 1,
        }
    }

    fn audio_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("sample.wav");
        std::fs::write(&path, vec![1u8; 2048]).unwrap();
        path
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = TranscriberSettings::from_config(&AppConfig::default()).unwrap();
        assert_eq!(settings.model, ModelSize::Medium);
        assert_eq!(settings.device, DevicePreference::Auto);
        assert_eq!(settings.language, "ml");
        assert_eq!(settings.max_concurrent, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_loaded_loads_once() {
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Text("x".into())));
        let transcriber = Arc::new(Transcriber::new(loader.clone(), settings()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let transcriber = Arc::clone(&transcriber);
                tokio::spawn(async move { transcriber.ensure_loaded().await.map(|h| h.device) })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), DeviceKind::Cpu);
        }
        assert_eq!(loader.load_count(), 1);
        assert!(transcriber.loaded().is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_surfaced_and_retried() {
        let loader = Arc::new(ScriptedLoader::failing_loads(2, ScriptedReply::Text("ok".into())));
        let transcriber = Transcriber::new(loader.clone(), settings());

        for _ in 0..2 {
            let err = transcriber.ensure_loaded().await.err().unwrap();
            assert!(matches!(err, TranscriberError::EngineLoad(_)));
            assert!(transcriber.loaded().is_none());
        }

        assert!(transcriber.ensure_loaded().await.is_ok());
        assert!(transcriber.ensure_loaded().await.is_ok());
        assert_eq!(loader.load_count(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_first_load_is_reused() {
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Text("x".into())).with_load_delay_ms(300));
        let transcriber = Transcriber::new(loader.clone(), settings());

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(50), transcriber.ensure_loaded()).await;
        assert!(abandoned.is_err());
        assert!(transcriber.loaded().is_none());

        assert!(transcriber.ensure_loaded().await.is_ok());
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn test_transcribe_trims_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = audio_file(&tmp);
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Text(" നമസ്കാരം \n".into())));
        let transcriber = Transcriber::new(loader.clone(), settings());

        let outcome = transcriber.transcribe(&path, TranscriptionTask::Transcribe).await.unwrap();
        assert_eq!(outcome, TranscriptOutcome::Text("നമസ്കാരം".to_string()));

        let requests = loader.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].language, "ml");
        assert_eq!(requests[0].task, TranscriptionTask::Transcribe);
    }

    #[tokio::test]
    async fn test_missing_or_blank_text_is_no_speech() {
        let tmp = tempfile::tempdir().unwrap();
        let path = audio_file(&tmp);

        for reply in [ScriptedReply::MissingText, ScriptedReply::Text("  \n ".into())] {
            let transcriber = Transcriber::new(Arc::new(ScriptedLoader::replying(reply)), settings());
            let outcome = transcriber.transcribe(&path, TranscriptionTask::Transcribe).await.unwrap();
            assert_eq!(outcome, TranscriptOutcome::NoSpeech);
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_checked_before_loading() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Text("x".into())));
        let transcriber = Transcriber::new(loader.clone(), settings());

        let err = transcriber
            .transcribe(&tmp.path().join("gone.wav"), TranscriptionTask::Transcribe)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriberError::AudioNotFound(_)));
        assert_eq!(loader.load_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_is_wrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = audio_file(&tmp);
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Fail("CUDA out of memory".into())));
        let transcriber = Transcriber::new(loader, settings());

        let err = transcriber.transcribe(&path, TranscriptionTask::Transcribe).await.unwrap_err();
        match err {
            TranscriberError::Transcription(msg) => assert_eq!(msg, "CUDA out of memory"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_failure_propagates_from_transcribe() {
        let tmp = tempfile::tempdir().unwrap();
        let path = audio_file(&tmp);
        let loader = Arc::new(ScriptedLoader::failing_loads(1, ScriptedReply::Text("x".into())));
        let transcriber = Transcriber::new(loader, settings());

        let err = transcriber.transcribe(&path, TranscriptionTask::Transcribe).await.unwrap_err();
        assert!(matches!(err, TranscriberError::EngineLoad(_)));
    }

    #[tokio::test]
    async fn test_single_permit_serializes_engine_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let path = audio_file(&tmp);
        let loader = Arc::new(ScriptedLoader::replying(ScriptedReply::Text("x".into())).with_delay_ms(20));
        let transcriber = Arc::new(Transcriber::new(loader.clone(), settings()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let transcriber = Arc::clone(&transcriber);
                let path = path.clone();
                tokio::spawn(async move { transcriber.transcribe(&path, TranscriptionTask::Transcribe).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(loader.max_in_flight(), 1);
        assert_eq!(loader.requests().len(), 4);
    }
}
