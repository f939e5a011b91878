//! Applying a W-matrix to a single vector.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alignment::wmatrix::WMatrix;
use crate::error::{EngineError, Result};
use crate::vector;

/// Loss a raw, unaligned transfer is assumed to incur; used by `fidelity_boost`.
pub const BASELINE_LOSS: f64 = 0.1;

/// Result of aligning one source vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Vector in the target space.
    pub output: Vec<f32>,

    /// In [0, 1]; decreases monotonically with `alignment_loss`.
    pub confidence: f64,

    /// Lower is better.
    pub alignment_loss: f64,

    /// Against the reference, when one was supplied.
    pub cosine_similarity: Option<f64>,
    pub euclidean_distance: Option<f64>,
}

impl AlignmentResult {
    /// Percentage improvement of this alignment over [`BASELINE_LOSS`], in [0, 100].
    pub fn fidelity_boost(&self) -> f64 {
        if self.alignment_loss >= BASELINE_LOSS {
            return 0.0;
        }
        ((BASELINE_LOSS - self.alignment_loss) / BASELINE_LOSS * 100.0).clamp(0.0, 100.0)
    }
}

/// Map a loss onto a confidence in [0, 1]. A NaN loss has no confidence.
fn confidence_from_loss(loss: f64) -> f64 {
    if loss.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + loss.max(0.0))
}

/// Align `vector` with `matrix`, scoring against `reference` when given.
///
/// With a reference the loss is `1 - cosine(output, reference)`. Without
/// one it is how far the output/input magnitude ratio strays from 1.
pub fn align(
    matrix: &WMatrix,
    vector: &[f32],
    reference: Option<&[f32]>,
) -> Result<AlignmentResult> {
    if let Some(reference) = reference {
        if reference.len() != matrix.output_dim() {
            return Err(EngineError::dimension(
                "alignment reference",
                matrix.output_dim(),
                reference.len(),
            ));
        }
        EngineError::check_finite("alignment reference", reference)?;
    }
    let output = matrix.forward(vector)?;

    let (alignment_loss, cosine_similarity, euclidean_distance) = match reference {
        Some(reference) => {
            let cos = vector::cosine(&output, reference);
            (1.0 - cos, Some(cos), Some(vector::euclidean(&output, reference)))
        }
        None => {
            let (in_norm, out_norm) = (vector::norm(vector), vector::norm(&output));
            let loss = if in_norm < 1e-12 {
                if out_norm < 1e-12 {
                    0.0
                } else {
                    1.0
                }
            } else {
                (out_norm / in_norm - 1.0).abs()
            };
            (loss, None, None)
        }
    };
    let confidence = confidence_from_loss(alignment_loss);

    debug!(
        source = %matrix.source_model,
        target = %matrix.target_model,
        alignment_loss,
        confidence,
        "Aligned vector"
    );

    Ok(AlignmentResult {
        output,
        confidence,
        alignment_loss,
        cosine_similarity,
        euclidean_distance,
    })
}

impl WMatrix {
    pub fn align(&self, vector: &[f32], reference: Option<&[f32]>) -> Result<AlignmentResult> {
        align(self, vector, reference)
    }
}
