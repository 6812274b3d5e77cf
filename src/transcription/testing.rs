//! Scripted in-memory engine for tests.

use crate::transcription::engine::{DecodeRequest, EngineLoader, EngineOutput, SpeechEngine};
use crate::transcription::model::ModelSize;
use candle_core::Device;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted engine answers to every call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    MissingText,
    Fail(String),
}

#[derive(Default)]
struct Shared {
    loads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<DecodeRequest>>,
}

/// Loader that hands out a [`ScriptedEngine`] and records how it was used.
pub struct ScriptedLoader {
    reply: ScriptedReply,
    translation: Option<ScriptedReply>,
    failing_loads: usize,
    delay: Duration,
    load_delay: Duration,
    removes_audio: bool,
    shared: Arc<Shared>,
}

impl ScriptedLoader {
    pub fn replying(reply: ScriptedReply) -> Self {
        Self {
            reply,
            translation: None,
            failing_loads: 0,
            delay: Duration::ZERO,
            // Widens the race window for the single-load tests
            load_delay: Duration::from_millis(10),
            removes_audio: false,
            shared: Arc::default(),
        }
    }

    /// The first `failures` loads fail, later ones succeed.
    pub fn failing_loads(failures: usize, reply: ScriptedReply) -> Self {
        Self {
            failing_loads: failures,
            ..Self::replying(reply)
        }
    }

    /// Answer translate requests differently from transcribe requests.
    pub fn with_translation(mut self, reply: ScriptedReply) -> Self {
        self.translation = Some(reply);
        self
    }

    pub fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub fn with_load_delay_ms(mut self, millis: u64) -> Self {
        self.load_delay = Duration::from_millis(millis);
        self
    }

    /// The engine deletes the audio file once it has decoded it.
    pub fn removing_audio(mut self) -> Self {
        self.removes_audio = true;
        self
    }

    pub fn load_count(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DecodeRequest> {
        self.shared.requests.lock().unwrap().clone()
    }
}

impl EngineLoader for ScriptedLoader {
    fn load(&self, _size: ModelSize, _device: Device) -> anyhow::Result<Arc<dyn SpeechEngine>> {
        let attempt = self.shared.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);
        if attempt < self.failing_loads {
            anyhow::bail!("weights not found (attempt {})", attempt + 1);
        }
        Ok(Arc::new(ScriptedEngine {
            reply: self.reply.clone(),
            translation: self.translation.clone(),
            delay: self.delay,
            removes_audio: self.removes_audio,
            shared: Arc::clone(&self.shared),
        }))
    }
}

pub struct ScriptedEngine {
    reply: ScriptedReply,
    translation: Option<ScriptedReply>,
    delay: Duration,
    removes_audio: bool,
    shared: Arc<Shared>,
}

impl SpeechEngine for ScriptedEngine {
    fn transcribe(&self, audio_path: &Path, request: &DecodeRequest) -> anyhow::Result<EngineOutput> {
        anyhow::ensure!(audio_path.is_file(), "engine was handed a missing file");

        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.shared.requests.lock().unwrap().push(request.clone());
        std::thread::sleep(self.delay);
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.removes_audio {
            std::fs::remove_file(audio_path)?;
        }

        let reply = match (&self.translation, request.task) {
            (Some(translation), crate::transcription::TranscriptionTask::Translate) => translation,
            _ => &self.reply,
        };

        match reply {
            ScriptedReply::Text(text) => Ok(EngineOutput { text: Some(text.clone()) }),
            ScriptedReply::MissingText => Ok(EngineOutput { text: None }),
            ScriptedReply::Fail(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}
