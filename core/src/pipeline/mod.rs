//! Generation pipeline
//!
//! `encode -> shape -> infer -> decode_logits -> decode`, run synchronously
//! on a worker thread. The tokenizer and engine are shared read-only.

pub mod decoder;
pub mod shaper;

pub use decoder::{decode_logits, LogitsTensor};
pub use shaper::shape;

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{CellioError, Result};
use crate::inference::InferenceEngine;
use crate::tokenizer::TextTokenizer;

pub struct GenerationPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    engine: Arc<dyn InferenceEngine>,
    max_sequence_length: usize,
}

impl GenerationPipeline {
    /// The sequence length is taken from the engine's input contract.
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, engine: Arc<dyn InferenceEngine>) -> Self {
        let max_sequence_length = engine.sequence_length();
        Self {
            tokenizer,
            engine,
            max_sequence_length,
        }
    }

    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    pub fn tokenizer(&self) -> &Arc<dyn TextTokenizer> {
        &self.tokenizer
    }

    /// Produce the assistant reply for `text`. Blocking and CPU-bound.
    ///
    /// The decoded text is returned as is; it only counts as empty when it
    /// holds nothing but whitespace.
    pub fn run(&self, text: &str) -> Result<String> {
        let tokens = self.tokenizer.encode(text)?;
        if tokens.len() > self.max_sequence_length {
            debug!(
                input_len = tokens.len(),
                kept = self.max_sequence_length,
                "Truncating model input"
            );
        }

        let shaped = shape(&tokens, self.max_sequence_length, self.tokenizer.padding_id());
        let logits = self.engine.infer(&shaped).map_err(|e| {
            warn!(input_len = tokens.len(), shaped_len = shaped.len(), error = %e, "Inference failed");
            e
        })?;

        let output = decode_logits(&logits).map_err(|e| {
            error!(dims = ?logits.dims(), "Engine returned logits the decoder cannot read");
            e
        })?;

        let reply = self.tokenizer.decode(&output)?;
        if reply.trim().is_empty() {
            return Err(CellioError::EmptyResponse);
        }
        Ok(reply)
    }
}
