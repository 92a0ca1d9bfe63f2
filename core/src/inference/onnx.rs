//! ONNX Runtime engine

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use parking_lot::Mutex;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, info};

use super::{check_input_length, InferenceEngine};
use crate::error::{CellioError, Result};
use crate::pipeline::LogitsTensor;

/// Runs an ONNX model whose first input takes `i32` ids of shape (1, N) and
/// whose first output is the float logits tensor.
pub struct OnnxEngine {
    // A session run needs exclusive access, so runs are serialized here.
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    sequence_length: usize,
}

impl OnnxEngine {
    /// Load the model artifact and check its declared input (i32, (1, N)) and
    /// output (rank 3). Any failure is an `ArtifactLoad` error so it surfaces
    /// at load time rather than on the first generation.
    pub fn load(
        model_path: impl AsRef<Path>,
        sequence_length: usize,
        intra_threads: Option<usize>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(CellioError::artifact(model_path, "file not found"));
        }
        if sequence_length == 0 {
            return Err(CellioError::artifact(model_path, "sequence length must be positive"));
        }

        let mut builder = Session::builder()
            .map_err(load_error(model_path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error(model_path))?;
        if let Some(threads) = intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(load_error(model_path))?;
        }
        let session = builder
            .commit_from_file(model_path)
            .map_err(load_error(model_path))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| CellioError::artifact(model_path, "model declares no inputs"))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| CellioError::artifact(model_path, "model declares no outputs"))?;

        if input.input_type.tensor_type() != Some(TensorElementType::Int32) {
            return Err(CellioError::artifact(
                model_path,
                format!("input {:?} must be an i32 tensor", input.name),
            ));
        }
        check_input_dims(&tensor_dims(&input.input_type), sequence_length)
            .map_err(|reason| CellioError::artifact(model_path, reason))?;
        check_output_dims(&tensor_dims(&output.output_type))
            .map_err(|reason| CellioError::artifact(model_path, reason))?;

        let input_name = input.name.clone();
        let output_name = output.name.clone();

        info!(
            model = %model_path.display(),
            input = %input_name,
            output = %output_name,
            sequence_length,
            "Loaded ONNX model"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            sequence_length,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn infer(&self, input: &[u32]) -> Result<LogitsTensor> {
        check_input_length(input.len(), self.sequence_length)?;
        let input_len = input.len();

        let ids = input
            .iter()
            .map(|&id| {
                i32::try_from(id).map_err(|_| {
                    CellioError::inference(format!("token id {} exceeds i32", id), input_len)
                })
            })
            .collect::<Result<Vec<i32>>>()?;
        let ids = Array2::from_shape_vec((1, input_len), ids).map_err(run_error(input_len))?;
        let tensor = Tensor::from_array(ids).map_err(run_error(input_len))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(run_error(input_len))?;
        let scores = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(run_error(input_len))?
            .to_owned();

        debug!(dims = ?scores.shape(), "Model run complete");
        Ok(LogitsTensor::new(scores))
    }
}

/// Declared dimensions of a tensor value; negative entries are dynamic
fn tensor_dims(value: &ValueType) -> Vec<i64> {
    value
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
        .unwrap_or_default()
}

/// The id input must be (1, N) with N matching the configured length.
fn check_input_dims(dims: &[i64], sequence_length: usize) -> std::result::Result<(), String> {
    let fits = |dim: i64, expected: usize| dim < 0 || dim as usize == expected;
    match dims {
        [batch, len] if fits(*batch, 1) && fits(*len, sequence_length) => Ok(()),
        [_, _] => Err(format!(
            "input shape {:?} does not accept (1, {})",
            dims, sequence_length
        )),
        _ => Err(format!("input must have rank 2, model declares {:?}", dims)),
    }
}

/// The logits output must be (batch, sequence, vocabulary).
fn check_output_dims(dims: &[i64]) -> std::result::Result<(), String> {
    if dims.len() == 3 {
        Ok(())
    } else {
        Err(format!("output must have rank 3, model declares {:?}", dims))
    }
}

fn load_error<E: Display>(model_path: &Path) -> impl Fn(E) -> CellioError + '_ {
    move |e| CellioError::artifact(model_path, e)
}

fn run_error<E: Display>(input_len: usize) -> impl Fn(E) -> CellioError {
    move |e| CellioError::inference(e, input_len)
}
