//! Inference Engine
//!
//! A fixed-shape model: (1, N) token ids in, (1, N, vocabulary) scores out.
//! Engines are loaded once and shared read-only by every generation.

pub mod onnx;

pub use onnx::OnnxEngine;

use crate::error::{CellioError, Result};
use crate::pipeline::LogitsTensor;

pub trait InferenceEngine: Send + Sync {
    /// Fixed input length N of the model
    fn sequence_length(&self) -> usize;

    /// Run the model once. Blocking; call it off the control path.
    fn infer(&self, input: &[u32]) -> Result<LogitsTensor>;
}

/// Reject inputs that do not match the engine's declared length
pub(crate) fn check_input_length(input_len: usize, expected: usize) -> Result<()> {
    if input_len != expected {
        return Err(CellioError::inference(
            format!("model expects {} tokens, got {}", expected, input_len),
            input_len,
        ));
    }
    Ok(())
}
