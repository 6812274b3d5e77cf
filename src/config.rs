//! # Configuration Management
//!
//! Loads the service configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables with the `APP_` prefix
//! - The bare `HOST` / `PORT` variables used by most hosting platforms
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` and `PORT`
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_UPLOAD__DIR`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Nested keys use a double underscore in environment variables because
//! several field names contain single underscores themselves
//! (`APP_UPLOAD__MAX_FILE_SIZE_BYTES` maps to `upload.max_file_size_bytes`).
//! Lists are comma separated: `APP_UPLOAD__ALLOWED_EXTENSIONS=wav,mp3`.

use crate::device::DevicePreference;
use crate::transcription::model::ModelSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// 16 MiB, the largest upload accepted by default.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: usize = 16 * 1024 * 1024;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub models: ModelsConfig,
    pub performance: PerformanceConfig,
}

/// Listening address of the HTTP server.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any interface (containers, production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transient upload storage and admission rules.
///
/// ## Fields:
/// - `dir`: Scratch directory holding uploads for the duration of one request
/// - `max_file_size_bytes`: Uploads above this size are rejected with 413
/// - `allowed_extensions`: Lowercase extensions (without the dot) accepted for transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub dir: String,
    pub max_file_size_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

/// Speech model configuration.
///
/// ## Fields:
/// - `whisper_model`: Model size ("tiny", "base", "small", "medium", "large")
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
/// - `language`: Language token passed to the model ("ml" for Malayalam)
/// - `translate`: Also return an English translation next to the transcript
/// - `preload`: Load the model in the background at startup instead of on first request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    pub language: String,
    pub translate: bool,
    pub preload: bool,
}

/// Performance tuning configuration.
///
/// `max_concurrent_transcriptions` bounds how many engine calls run at the
/// same time. The model is shared, so anything above 1 only makes sense with
/// enough accelerator memory and CPU cores to go around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_transcriptions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            upload: UploadConfig {
                dir: "uploads".to_string(),
                max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
                allowed_extensions: ["wav", "mp3", "ogg", "m4a", "webm"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
            },
            models: ModelsConfig {
                whisper_model: "medium".to_string(),  // Best accuracy/latency trade-off for Malayalam
                device: "auto".to_string(),
                language: "ml".to_string(),
                translate: false,
                preload: false,
            },
            performance: PerformanceConfig {
                max_concurrent_transcriptions: 1,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_MODELS__WHISPER_MODEL=small`: Use a smaller model
    /// - `APP_MODELS__TRANSLATE=true`: Return translations as well
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.normalize();
        Ok(config)
    }

    /// Lowercase and strip leading dots from the extension allow-list so
    /// `".WAV"` in a config file behaves like `"wav"`.
    fn normalize(&mut self) {
        self.upload.allowed_extensions = self
            .upload
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these at startup gives an operator a clear message instead of
    /// a confusing failure on the first upload.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upload.dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.upload.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one allowed file extension is required"));
        }

        self.models
            .whisper_model
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid models.whisper_model: {}", e))?;

        self.models
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!("Invalid models.device: {}", e))?;

        if self.models.language.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription language cannot be empty"));
        }

        if self.performance.max_concurrent_transcriptions == 0 {
            return Err(anyhow::anyhow!("Max concurrent transcriptions must be greater than 0"));
        }

        Ok(())
    }

    /// Whether `extension` (any case, no dot) is on the allow-list.
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.upload.allowed_extensions.iter().any(|allowed| *allowed == extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.upload.max_file_size_bytes, 16 * 1024 * 1024);
        assert_eq!(config.models.whisper_model, "medium");
        assert_eq!(config.models.language, "ml");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.allowed_extensions.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_transcriptions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allowed_extensions() {
        let mut config = AppConfig::default();
        assert!(config.is_allowed_extension("wav"));
        assert!(config.is_allowed_extension("WEBM"));
        assert!(!config.is_allowed_extension("exe"));

        config.upload.allowed_extensions = vec![".FLAC".to_string(), " ".to_string()];
        config.normalize();
        assert_eq!(config.upload.allowed_extensions, vec!["flac".to_string()]);
        assert!(config.is_allowed_extension("flac"));
    }
}
