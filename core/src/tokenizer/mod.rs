//! Tokenizer Adapter
//!
//! Turns text into token ids and back. The Hugging Face implementation is
//! loaded from two artifacts:
//!
//! - `tokenizer.json`: vocabulary, merges and pre/post-processing rules
//! - `tokenizer_config.json`: behavior settings, including the padding token
//!
//! The padding id always comes from the configuration artifact. It is never
//! assumed to be 0.

use serde::Deserialize;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::{CellioError, Result};

/// Text <-> token id conversion. Implementations are immutable after load
/// and shared read-only across threads.
pub trait TextTokenizer: Send + Sync {
    /// Deterministic: identical text always yields identical ids
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Padding ids and special tokens contribute no text
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Id used to fill sequences up to the engine's fixed length
    fn padding_id(&self) -> u32;
}

/// `pad_token` is either a bare string or an added-token object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenSpec {
    Plain(String),
    Added { content: String },
}

impl TokenSpec {
    fn content(&self) -> &str {
        match self {
            TokenSpec::Plain(s) => s,
            TokenSpec::Added { content } => content,
        }
    }
}

/// Fields of `tokenizer_config.json` the adapter relies on
#[derive(Debug, Deserialize)]
struct TokenizerSettings {
    pad_token: Option<TokenSpec>,
    #[serde(default)]
    model_max_length: Option<f64>,
}

/// Tokenizer backed by the `tokenizers` crate
pub struct HfTokenizer {
    inner: Tokenizer,
    padding_id: u32,
    model_max_length: Option<usize>,
    add_special_tokens: bool,
}

impl HfTokenizer {
    /// Load both artifacts. Fails with `ArtifactLoad` when either file is
    /// missing, unreadable or structurally invalid, or when the padding token
    /// cannot be resolved against the vocabulary.
    pub fn load(
        config_path: impl AsRef<Path>,
        vocab_path: impl AsRef<Path>,
        add_special_tokens: bool,
    ) -> Result<Self> {
        let config_path = config_path.as_ref();
        let vocab_path = vocab_path.as_ref();

        let content = std::fs::read_to_string(config_path)
            .map_err(|e| CellioError::artifact(config_path, e))?;
        let settings: TokenizerSettings = serde_json::from_str(&content)
            .map_err(|e| CellioError::artifact(config_path, e))?;

        if !vocab_path.is_file() {
            return Err(CellioError::artifact(vocab_path, "file not found"));
        }
        let inner = Tokenizer::from_file(vocab_path)
            .map_err(|e| CellioError::artifact(vocab_path, e))?;

        let pad_token = settings
            .pad_token
            .as_ref()
            .map(TokenSpec::content)
            .ok_or_else(|| CellioError::artifact(config_path, "no pad_token configured"))?;
        let padding_id = inner.token_to_id(pad_token).ok_or_else(|| {
            CellioError::artifact(
                vocab_path,
                format!("pad_token {:?} is not in the vocabulary", pad_token),
            )
        })?;

        // Hugging Face writes a huge sentinel float when there is no limit.
        let model_max_length = settings
            .model_max_length
            .filter(|n| n.is_finite() && *n > 0.0 && *n < 1e9)
            .map(|n| n as usize);

        info!(
            vocab_size = inner.get_vocab_size(true),
            padding_id,
            pad_token,
            "Loaded tokenizer"
        );

        Ok(Self {
            inner,
            padding_id,
            model_max_length,
            add_special_tokens,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Context length advertised by the configuration artifact, if any
    pub fn model_max_length(&self) -> Option<usize> {
        self.model_max_length
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, self.add_special_tokens)
            .map_err(|e| CellioError::inference(format!("tokenization failed: {}", e), 0))?;
        let ids = encoding.get_ids().to_vec();
        debug!(chars = text.len(), tokens = ids.len(), "Encoded text");
        Ok(ids)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let content: Vec<u32> = tokens
            .iter()
            .copied()
            .filter(|&id| id != self.padding_id)
            .collect();
        self.inner
            .decode(&content, true)
            .map_err(|e| CellioError::inference(format!("detokenization failed: {}", e), tokens.len()))
    }

    fn padding_id(&self) -> u32 {
        self.padding_id
    }
}
