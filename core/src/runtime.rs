//! Process-wide model runtime
//!
//! The tokenizer and engine are loaded at most once per process and then
//! injected into orchestrators as an immutable handle. A load failure is kept
//! too, so every caller sees the same `ArtifactLoad` error without retrying.

use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

use crate::config::ModelConfig;
use crate::error::{CellioError, Result};
use crate::inference::OnnxEngine;
use crate::pipeline::GenerationPipeline;
use crate::tokenizer::HfTokenizer;

/// Either the ready pipeline or the reason generation is disabled
pub type PipelineHandle = std::result::Result<Arc<GenerationPipeline>, Arc<CellioError>>;

static RUNTIME: OnceLock<PipelineHandle> = OnceLock::new();

/// Load tokenizer and engine from the configured artifacts
pub fn load_pipeline(config: &ModelConfig) -> Result<GenerationPipeline> {
    let tokenizer = HfTokenizer::load(
        &config.tokenizer_config_path,
        &config.tokenizer_path,
        config.add_special_tokens,
    )?;
    if let Some(limit) = tokenizer.model_max_length() {
        if config.max_sequence_length > limit {
            warn!(
                max_sequence_length = config.max_sequence_length,
                model_max_length = limit,
                "Configured sequence length exceeds the tokenizer's advertised limit"
            );
        }
    }
    let engine = OnnxEngine::load(
        &config.model_path,
        config.max_sequence_length,
        config.intra_threads,
    )?;
    Ok(GenerationPipeline::new(Arc::new(tokenizer), Arc::new(engine)))
}

/// Shared pipeline for this process. The first call loads it; later calls
/// return the same handle regardless of `config`.
pub fn shared_pipeline(config: &ModelConfig) -> PipelineHandle {
    RUNTIME
        .get_or_init(|| into_handle(load_pipeline(config)))
        .clone()
}

/// Log a load failure once and wrap the outcome for sharing
pub fn into_handle(loaded: Result<GenerationPipeline>) -> PipelineHandle {
    loaded.map(Arc::new).map_err(|e| {
        error!(error = %e, "Generation disabled: model artifacts failed to load");
        Arc::new(e)
    })
}
