//! # Whisper Model
//!
//! Candle-rs implementation of the [`SpeechEngine`] contract.
//!
//! ## Loading Process:
//! 1. Create a HuggingFace API client (honours `HF_TOKEN`, `HF_HUB_CACHE`, `HF_HOME`)
//! 2. Download config, tokenizer and safetensors weights (cached locally)
//! 3. Fetch the precomputed 80-bin mel filter bank
//! 4. Memory-map the weights onto the selected device
//!
//! ## Transcription Process:
//! 1. Decode the file to 16 kHz mono PCM (see `audio::decoder`)
//! 2. Split into 30 second windows, zero-padding the last one
//! 3. Log-mel spectrogram → encoder → greedy decoder loop per window
//! 4. Prompt: `<|startoftranscript|><|ml|><|transcribe|><|notimestamps|>`
//!    (or `<|translate|>` for English output)
//! 5. Detokenize each window and join with spaces

use crate::audio::decode_file;
use crate::transcription::engine::{
    DecodeRequest, EngineLoader, EngineOutput, SpeechEngine, TranscriptionTask,
};
use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::sync::{Api, ApiBuilder};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Repository holding the precomputed 80-bin mel filter bank.
const MEL_FILTERS_REPO: &str = "FL33TW00D-HF/whisper-base";
const MEL_FILTERS_FILE: &str = "melfilters.bytes";

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Malayalam**: below `small` the output is rarely usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate download size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Loads [`WhisperModel`]s from the HuggingFace hub.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhisperLoader;

impl EngineLoader for WhisperLoader {
    fn load(&self, size: ModelSize, device: Device) -> Result<Arc<dyn SpeechEngine>> {
        let model = WhisperModel::load(size, device)?;
        Ok(Arc::new(model))
    }
}

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// The decoder keeps a cross-attention KV cache, so decoding needs `&mut`
/// access. The model sits behind a `Mutex`; callers already limit
/// concurrency, the lock only makes that safe.
pub struct WhisperModel {
    model: Mutex<m::model::Whisper>,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    size: ModelSize,
}

impl WhisperModel {
    /// Download (or read from cache) and load a Whisper model. Blocking.
    pub fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!(
            model = %size,
            repo = size.repo_name(),
            approx_mb = size.size_mb(),
            "Loading Whisper model..."
        );
        let start_time = Instant::now();

        let api = build_api()?;
        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .with_context(|| format!("failed to download config.json from {}", size.repo_name()))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .with_context(|| format!("failed to download tokenizer.json from {}", size.repo_name()))?;
        let weights_filename = repo
            .get("model.safetensors")
            .with_context(|| format!("failed to download model.safetensors from {}", size.repo_name()))?;
        let mel_filename = api
            .model(MEL_FILTERS_REPO.to_string())
            .get(MEL_FILTERS_FILE)
            .with_context(|| format!("failed to download {} from {}", MEL_FILTERS_FILE, MEL_FILTERS_REPO))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)
            .context("failed to parse model config")?;
        tracing::debug!(
            num_mel_bins = config.num_mel_bins,
            max_target_positions = config.max_target_positions,
            "Model config loaded"
        );

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        let mel_filters = read_mel_filters(&std::fs::read(mel_filename)?, &config)?;

        // SAFETY: the safetensors file is memory-mapped read-only and is not
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            model = %size,
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            "Whisper model loaded"
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
            tokenizer,
            mel_filters,
            size,
        })
    }

    fn token_id(&self, token: &str) -> Result<u32> {
        self.tokenizer
            .token_to_id(token)
            .ok_or_else(|| anyhow!("token not found in vocabulary: {}", token))
    }

    /// Decoder prompt for a request.
    fn prompt(&self, request: &DecodeRequest) -> Result<Vec<u32>> {
        let task_token = match request.task {
            TranscriptionTask::Transcribe => m::TRANSCRIBE_TOKEN,
            TranscriptionTask::Translate => m::TRANSLATE_TOKEN,
        };
        Ok(vec![
            self.token_id(m::SOT_TOKEN)?,
            self.token_id(&format!("<|{}|>", request.language))?,
            self.token_id(task_token)?,
            self.token_id(m::NO_TIMESTAMPS_TOKEN)?,
        ])
    }

    /// Greedy decode of one 30 second window. Returns the generated tokens
    /// without the prompt.
    fn decode_window(
        &self,
        model: &mut m::model::Whisper,
        mel: &Tensor,
        prompt: &[u32],
        eot_token: u32,
    ) -> Result<Vec<u32>> {
        let audio_features = model.encoder.forward(mel, true)?;
        let sample_len = self.config.max_target_positions / 2;
        let mut tokens = prompt.to_vec();

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&tokens_t, &audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let next_token = logits.argmax(0)?.to_scalar::<u32>()?;

            if next_token == eot_token || tokens.len() >= self.config.max_target_positions {
                break;
            }
            tokens.push(next_token);
        }

        model.reset_kv_cache();
        Ok(tokens.split_off(prompt.len()))
    }
}

impl SpeechEngine for WhisperModel {
    fn transcribe(&self, audio_path: &Path, request: &DecodeRequest) -> Result<EngineOutput> {
        let pcm = decode_file(audio_path)?;
        if pcm.is_empty() {
            tracing::warn!("Decoded audio holds no samples");
            return Ok(EngineOutput { text: None });
        }

        let prompt = self.prompt(request)?;
        let eot_token = self.token_id(m::EOT_TOKEN)?;
        let n_mels = self.config.num_mel_bins;

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("whisper model lock poisoned"))?;

        let mut segments = Vec::new();
        for (index, window) in pcm.chunks(m::N_SAMPLES).enumerate() {
            let samples = pad_window(window, m::N_SAMPLES);
            let mel = m::audio::pcm_to_mel(&self.config, &samples, &self.mel_filters);
            let n_frames = mel.len() / n_mels;
            let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?;

            let tokens = self.decode_window(&mut model, &mel, &prompt, eot_token)?;
            let text = self
                .tokenizer
                .decode(&tokens, true)
                .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;
            tracing::debug!(model = %self.size, window = index, tokens = tokens.len(), "Decoded audio window");

            let text = text.trim();
            if !text.is_empty() {
                segments.push(text.to_string());
            }
        }

        Ok(EngineOutput {
            text: Some(segments.join(" ")),
        })
    }
}

fn build_api() -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);

    if let Ok(token) = std::env::var("HF_TOKEN") {
        tracing::debug!("Using HF token from environment");
        builder = builder.with_token(Some(token));
    }

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(std::path::PathBuf::from(hf_home).join("hub"));
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to create HuggingFace API client: {}", e))
}

/// Parse little-endian `f32` mel filters and check they match the model.
fn read_mel_filters(bytes: &[u8], config: &Config) -> Result<Vec<f32>> {
    let expected = config.num_mel_bins * (m::N_FFT / 2 + 1);
    if bytes.len() != expected * 4 {
        return Err(anyhow!(
            "mel filter bank has {} bytes, model with {} mel bins needs {}",
            bytes.len(),
            config.num_mel_bins,
            expected * 4
        ));
    }

    let mut filters = vec![0f32; expected];
    LittleEndian::read_f32_into(bytes, &mut filters);
    Ok(filters)
}

fn pad_window(window: &[f32], len: usize) -> Vec<f32> {
    let mut samples = window.to_vec();
    samples.resize(len, 0.0);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_mels(num_mel_bins: usize) -> Config {
        serde_json::from_value(serde_json::json!({
            "num_mel_bins": num_mel_bins,
            "max_source_positions": 1500,
            "d_model": 384,
            "encoder_attention_heads": 6,
            "encoder_layers": 4,
            "vocab_size": 51865,
            "max_target_positions": 448,
            "decoder_attention_heads": 6,
            "decoder_layers": 4,
            "suppress_tokens": []
        }))
        .unwrap()
    }

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
        assert_eq!(ModelSize::Medium.to_string(), "medium");
        assert_eq!(ModelSize::Medium.repo_name(), "openai/whisper-medium");
    }

    #[test]
    fn test_read_mel_filters() {
        let config = config_with_mels(80);
        let expected = 80 * (m::N_FFT / 2 + 1);

        let mut bytes = vec![0u8; expected * 4];
        LittleEndian::write_f32(&mut bytes[4..8], 0.5);
        let filters = read_mel_filters(&bytes, &config).unwrap();
        assert_eq!(filters.len(), expected);
        assert_eq!(filters[1], 0.5);

        assert!(read_mel_filters(&bytes[..bytes.len() - 4], &config).is_err());
        assert!(read_mel_filters(&bytes, &config_with_mels(128)).is_err());
    }

    #[test]
    fn test_pad_window() {
        assert_eq!(pad_window(&[1.0, 2.0], 4), vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(pad_window(&[1.0; 4], 4).len(), 4);
    }
}
