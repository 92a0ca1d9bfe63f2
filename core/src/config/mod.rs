//! Configuration management
//!
//! Unified configuration for Cellio. All configuration types are exported
//! from this module.

pub mod store;

pub use store::{Config, LoggingConfig, ModelConfig, StorageConfig, DEFAULT_MAX_SEQUENCE_LENGTH};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error occurred while reading/writing config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// A value failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
