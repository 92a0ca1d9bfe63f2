//! Greedy decoding over the engine's logits

use ndarray::{ArrayD, Axis, Ix3, IxDyn};

use crate::error::{CellioError, Result};

/// Scores produced by the engine, shaped (batch, sequence, vocabulary)
#[derive(Debug, Clone)]
pub struct LogitsTensor {
    scores: ArrayD<f32>,
}

impl LogitsTensor {
    pub fn new(scores: ArrayD<f32>) -> Self {
        Self { scores }
    }

    /// Build from a flat row-major buffer
    pub fn from_shape_vec(dims: &[usize], data: Vec<f32>) -> Result<Self> {
        let scores = ArrayD::from_shape_vec(IxDyn(dims), data).map_err(|_| {
            CellioError::DecodeShape {
                dims: dims.to_vec(),
            }
        })?;
        Ok(Self { scores })
    }

    pub fn dims(&self) -> &[usize] {
        self.scores.shape()
    }
}

/// Pick the highest-scoring vocabulary index at every sequence position.
///
/// Ties resolve to the lowest index. NaN scores never win. Fails with
/// `DecodeShape` unless the tensor is (1, sequence, vocabulary) with a
/// non-empty vocabulary.
pub fn decode_logits(logits: &LogitsTensor) -> Result<Vec<u32>> {
    let shape_error = || CellioError::DecodeShape {
        dims: logits.dims().to_vec(),
    };

    let scores = logits
        .scores
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| shape_error())?;
    let (batch, _, vocab) = scores.dim();
    if batch != 1 || vocab == 0 {
        return Err(shape_error());
    }

    let positions = scores.index_axis(Axis(0), 0);
    let tokens = positions
        .outer_iter()
        .map(|row| {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for (index, &score) in row.iter().enumerate() {
                if score > best_score {
                    best = index;
                    best_score = score;
                }
            }
            best as u32
        })
        .collect();
    Ok(tokens)
}
