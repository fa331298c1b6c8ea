//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables (`APP__SECTION__KEY`, e.g. `APP__PIPELINE__WORKERS=8`)
//! - Platform variables: `HOST`, `PORT`, `MODEL_TYPE`, `MODEL_NUM` (alias `MODEL_ID`)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: derive `Serialize`/`Deserialize` so the same structs read TOML, env and JSON
//! - **`#[serde(default)]`**: a config file only has to mention the keys it changes
//! - **enums as config values**: `FailurePolicy` and `CacheKeying` are parsed from
//!   lowercase strings and matched exhaustively everywhere they are used
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (`HOST`, `PORT`, `MODEL_TYPE`, `MODEL_NUM`)
//! 2. `APP__` environment variables
//! 3. `config.toml`
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Complete application configuration.
///
/// Each section maps to one area of the service so that the batch tooling
/// (`prepare`, `trim`) and the HTTP server share the same feature parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub trim: TrimConfig,
    pub pipeline: PipelineConfig,
    pub dataset: DatasetConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Where uploaded and downloaded audio is stored before prediction.
    pub upload_dir: PathBuf,
    /// Deadline for one prediction, covering trim, extraction and inference.
    pub request_timeout_secs: u64,
    /// Deadline for fetching remote audio on `/bot`.
    pub download_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            upload_dir: PathBuf::from("uploads"),
            request_timeout_secs: 60,
            download_timeout_secs: 30,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Which trained model to serve.
///
/// Weights are resolved as `<models_dir>/<model_type>/<model_id>.safetensors`,
/// with the class names in `<model_id>.labels.toml` next to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_type: String,
    pub model_id: String,
    pub models_dir: PathBuf,
    /// HuggingFace repository to fetch the artifact from when it is not on disk.
    pub remote_repo: Option<String>,
    /// `auto`, `cpu`, `cuda` or `metal`.
    pub device: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: "cnn".to_string(),
            model_id: "1".to_string(),
            models_dir: PathBuf::from("models"),
            remote_repo: None,
            device: "cpu".to_string(),
        }
    }
}

/// MFCC extraction and segmentation parameters.
///
/// A hop of 800 samples at 24 kHz gives 30 frames per second, so one segment of
/// width 30 covers one second of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub segment_width: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            n_mfcc: 13,
            n_fft: 2048,
            hop_length: 800,
            n_mels: 128,
            segment_width: 30,
        }
    }
}

/// Silence trimming for request-time uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    pub chunk_ms: u32,
    pub threshold_dbfs: f64,
    /// External tool used to turn non-WAV uploads into WAV.
    pub converter: String,
    pub conversion_timeout_secs: u64,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            chunk_ms: 10,
            threshold_dbfs: -50.0,
            converter: "ffmpeg".to_string(),
            conversion_timeout_secs: 60,
        }
    }
}

/// What a batch does when one item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failure aborts the batch.
    #[default]
    FailFast,
    /// Failing items are logged and dropped together with their label.
    Skip,
}

/// How cache entries are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeying {
    /// Source path string. Edits to a file at the same path go unnoticed.
    #[default]
    Path,
    /// SHA-256 of the source bytes.
    Content,
}

/// Batch feature pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker count, `0` means one per available CPU.
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    /// Per-item deadline in seconds, `0` disables it.
    pub item_timeout_secs: u64,
    /// Cache artifacts live next to their sources when unset.
    pub cache_dir: Option<PathBuf>,
    pub cache_keying: CacheKeying,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            failure_policy: FailurePolicy::FailFast,
            item_timeout_secs: 0,
            cache_dir: None,
            cache_keying: CacheKeying::Path,
        }
    }
}

impl PipelineConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Label assignment for training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScheme {
    /// Target language is class 0, everything else class 1.
    #[default]
    Binary,
    /// One class per observed source language, in sorted order.
    SourceLanguage,
}

/// Inputs and outputs of `prepare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub metadata_csv: PathBuf,
    pub audio_dir: PathBuf,
    pub audio_extension: String,
    pub output_dir: PathBuf,
    pub languages: Vec<String>,
    pub target_language: String,
    pub label_scheme: LabelScheme,
    pub test_size: f64,
    pub seed: u64,
    /// Non-target speakers must have lived in an English-speaking country for
    /// fewer years than this. `None` disables the filter.
    pub max_residence_years: Option<f64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            metadata_csv: PathBuf::from("bio_metadata.csv"),
            audio_dir: PathBuf::from("audio"),
            audio_extension: "wav".to_string(),
            output_dir: PathBuf::from("prepared"),
            languages: vec![
                "english".to_string(),
                "arabic".to_string(),
                "mandarin".to_string(),
            ],
            target_language: "english".to_string(),
            label_scheme: LabelScheme::Binary,
            test_size: 0.2,
            seed: 1234,
            max_residence_years: Some(10.0),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`
    /// - `APP__PIPELINE__FAILURE_POLICY=skip`
    /// - `MODEL_TYPE=cnn MODEL_NUM=3`: pick the served model like the deployment scripts do
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`AppConfig::load`] with an explicit config file instead of `config.toml`.
    pub fn load_from(file: Option<&std::path::Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::with_name("config").required(false),
        };

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(model_type) = env::var("MODEL_TYPE") {
            settings = settings.set_override("model.model_type", model_type)?;
        }
        if let Ok(model_id) = env::var("MODEL_NUM").or_else(|_| env::var("MODEL_ID")) {
            settings = settings.set_override("model.model_id", model_id)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that would fail later in less obvious ways.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.features.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }
        if self.features.n_mfcc == 0 || self.features.n_mfcc > self.features.n_mels {
            return Err(anyhow::anyhow!(
                "n_mfcc must be between 1 and n_mels ({})",
                self.features.n_mels
            ));
        }
        if self.features.hop_length == 0 || self.features.n_fft < 2 {
            return Err(anyhow::anyhow!("hop_length and n_fft must be positive"));
        }
        if self.features.n_fft % 2 != 0 {
            return Err(anyhow::anyhow!("n_fft must be even"));
        }
        if self.features.segment_width == 0 {
            return Err(anyhow::anyhow!("Segment width must be greater than 0"));
        }
        if self.trim.chunk_ms == 0 {
            return Err(anyhow::anyhow!("Trim chunk size must be greater than 0"));
        }
        if !(0.0..1.0).contains(&self.dataset.test_size) {
            return Err(anyhow::anyhow!("test_size must be in [0, 1)"));
        }
        if self.model.model_type.is_empty() || self.model.model_id.is_empty() {
            return Err(anyhow::anyhow!("Model type and id must be set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.features.sample_rate, 24_000);
        assert_eq!(config.features.n_mfcc, 13);
        assert_eq!(config.features.segment_width, 30);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::FailFast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.features.segment_width = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.features.n_mfcc = 200;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.features.n_fft = 2047;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [pipeline]
            workers = 3
            failure_policy = "skip"
            cache_keying = "content"
        "#;
        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.pipeline.cache_keying, CacheKeying::Content);
        assert_eq!(config.features, FeatureConfig::default());
    }

    #[test]
    fn test_effective_workers_is_positive() {
        let config = PipelineConfig::default();
        assert!(config.effective_workers() >= 1);
    }
}
