//! Structured error types for Cellio
//!
//! Every failure of the generation pipeline maps onto one of these variants.
//! The orchestrator converts them into a status transition plus a log entry;
//! none of them reach the host as an uncaught fault.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::StoreError;

/// Primary error type for Cellio operations
#[derive(Error, Debug)]
pub enum CellioError {
    // =========================================================================
    // Model / Tokenizer Artifacts
    // =========================================================================
    /// A model or tokenizer artifact is missing, unreadable or malformed.
    /// Generation stays disabled until the artifact is fixed.
    #[error("failed to load artifact {path}: {reason}")]
    ArtifactLoad { path: PathBuf, reason: String },

    // =========================================================================
    // Generation Errors
    // =========================================================================
    /// Tokenization or model execution failed for one generation cycle
    #[error("inference failed (input length {input_len}): {reason}")]
    Inference { reason: String, input_len: usize },

    /// The engine produced a tensor the decoder cannot read
    #[error("logits tensor has unexpected shape {dims:?}")]
    DecodeShape { dims: Vec<usize> },

    /// The model produced nothing but padding or whitespace
    #[error("model produced an empty response")]
    EmptyResponse,

    // =========================================================================
    // Persistence / Configuration
    // =========================================================================
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CellioError {
    pub fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArtifactLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(reason: impl ToString, input_len: usize) -> Self {
        Self::Inference {
            reason: reason.to_string(),
            input_len,
        }
    }

    /// Model errors are rarely transient, so nothing here is retried
    /// automatically. The user retries by sending again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(StoreError::Io { .. }) => true,
            Self::ArtifactLoad { .. }
            | Self::Inference { .. }
            | Self::DecodeShape { .. }
            | Self::EmptyResponse
            | Self::Store(_)
            | Self::Config(_) => false,
        }
    }

    /// Whether this error turns generation off for the rest of the process
    pub fn disables_generation(&self) -> bool {
        matches!(self, Self::ArtifactLoad { .. })
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::ArtifactLoad { .. } => {
                "The on-device model could not be loaded. Check the model files in your configuration."
                    .to_string()
            }
            Self::Inference { .. } | Self::DecodeShape { .. } | Self::EmptyResponse => {
                "The assistant could not answer that message. Please try again.".to_string()
            }
            Self::Store(StoreError::SessionNotFound { .. }) => {
                "This chat no longer exists.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias using CellioError
pub type Result<T> = std::result::Result<T, CellioError>;
