//! Configuration Store
//!
//! Loads and saves the TOML config file. Missing sections fall back to
//! defaults rooted in the platform data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Fixed input length of the bundled model
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 512;

/// Unified Cellio configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model and tokenizer artifacts
    #[serde(default)]
    pub model: ModelConfig,

    /// Session storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log filtering
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Paths to the on-device artifacts and the engine input contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX model artifact
    pub model_path: PathBuf,
    /// Vocabulary and merge rules (`tokenizer.json`)
    pub tokenizer_path: PathBuf,
    /// Tokenizer behavior, including the padding token (`tokenizer_config.json`)
    pub tokenizer_config_path: PathBuf,
    /// Fixed input length the engine expects
    pub max_sequence_length: usize,
    /// Intra-op thread count handed to the engine; runtime default when unset
    pub intra_threads: Option<usize>,
    /// Whether encoding adds the model's special tokens (BOS/EOS)
    pub add_special_tokens: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let models = data_dir().join("models");
        Self {
            model_path: models.join("model.onnx"),
            tokenizer_path: models.join("tokenizer.json"),
            tokenizer_config_path: models.join("tokenizer_config.json"),
            max_sequence_length: DEFAULT_MAX_SEQUENCE_LENGTH,
            intra_threads: None,
            add_special_tokens: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per session
    pub sessions_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_dir: data_dir().join("sessions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cellio")
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default location, or defaults when no file exists.
    ///
    /// A file that exists but fails to parse is an error, not a silent
    /// fallback.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cellio").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.max_sequence_length == 0 {
            return Err(ConfigError::Invalid(
                "model.max_sequence_length must be greater than zero".to_string(),
            ));
        }
        if self.model.intra_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "model.intra_threads must be greater than zero when set".to_string(),
            ));
        }
        for (key, path) in [
            ("model.model_path", &self.model.model_path),
            ("model.tokenizer_path", &self.model.tokenizer_path),
            ("model.tokenizer_config_path", &self.model.tokenizer_config_path),
            ("storage.sessions_dir", &self.storage.sessions_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", key)));
            }
        }
        Ok(())
    }
}
