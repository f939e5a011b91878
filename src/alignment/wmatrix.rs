//! W-matrix: a small MLP mapping one model's embedding space onto another's.
//!
//! Layer widths are chosen from the dimension gap: a single hidden layer
//! midway between source and target for small gaps, two interpolated hidden
//! layers for wide ones. Weights use Xavier-style uniform initialization with
//! variance `1 / fan_in`; biases start at zero. A matrix is immutable once
//! built; fitting produces a new one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alignment::activation::Activation;
use crate::codec::{decode_envelope, encode_envelope, ArtifactKind};
use crate::config::AlignmentConfig;
use crate::error::{EngineError, Result};

/// Shape and activation of a W-matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub input_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub output_dim: usize,
    pub activation: Activation,
}

impl Architecture {
    /// Widths of every layer boundary: input, hidden..., output.
    pub fn widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.hidden_dims.len() + 2);
        widths.push(self.input_dim);
        widths.extend(&self.hidden_dims);
        widths.push(self.output_dim);
        widths
    }
}

/// Hidden widths for a `source -> target` transform.
pub fn hidden_dims_for(source_dim: usize, target_dim: usize, wide_gap: usize) -> Vec<usize> {
    let (s, t) = (source_dim as i64, target_dim as i64);
    if source_dim.abs_diff(target_dim) < wide_gap {
        vec![((s + t) / 2) as usize]
    } else {
        vec![(s + (t - s) / 3) as usize, (s + 2 * (t - s) / 3) as usize]
    }
}

/// One affine layer; `weights` is row-major `out_dim x in_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub in_dim: usize,
    pub out_dim: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Layer {
    fn xavier(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Self {
        // Uniform(-a, a) has variance a^2 / 3, so a = sqrt(3 / fan_in).
        let limit = (3.0 / in_dim as f32).sqrt();
        let weights = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            in_dim,
            out_dim,
            weights,
            bias: vec![0.0; out_dim],
        }
    }

    fn identity(dim: usize) -> Self {
        let mut weights = vec![0.0; dim * dim];
        for i in 0..dim {
            weights[i * dim + i] = 1.0;
        }
        Self {
            in_dim: dim,
            out_dim: dim,
            weights,
            bias: vec![0.0; dim],
        }
    }

    /// `W x + b`.
    pub fn affine(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .chunks_exact(self.in_dim)
            .zip(self.bias.iter())
            .map(|(row, &b)| {
                row.iter()
                    .zip(input.iter())
                    .map(|(&w, &x)| w as f64 * x as f64)
                    .sum::<f64>() as f32
                    + b
            })
            .collect()
    }

    fn check(&self, index: usize) -> Result<()> {
        if self.in_dim == 0 || self.out_dim == 0 {
            return Err(EngineError::invalid_config(format!(
                "layer {index} has a zero dimension"
            )));
        }
        if self.weights.len() != self.in_dim * self.out_dim {
            return Err(EngineError::dimension(
                format!("layer {index} weight count"),
                self.in_dim * self.out_dim,
                self.weights.len(),
            ));
        }
        if self.bias.len() != self.out_dim {
            return Err(EngineError::dimension(
                format!("layer {index} bias length"),
                self.out_dim,
                self.bias.len(),
            ));
        }
        Ok(())
    }
}

/// An alignment transform between two models' embedding spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WMatrix {
    pub architecture: Architecture,
    pub layers: Vec<Layer>,
    pub source_model: String,
    pub target_model: String,
}

impl WMatrix {
    /// Build a randomly initialized transform for `source_dim -> target_dim`.
    pub fn build(
        source_dim: usize,
        target_dim: usize,
        source_model: impl Into<String>,
        target_model: impl Into<String>,
        config: &AlignmentConfig,
    ) -> Result<Self> {
        if source_dim == 0 || target_dim == 0 {
            return Err(EngineError::invalid_config(format!(
                "dimensions must be positive, got {source_dim} -> {target_dim}"
            )));
        }
        let architecture = Architecture {
            input_dim: source_dim,
            hidden_dims: hidden_dims_for(source_dim, target_dim, config.wide_gap),
            output_dim: target_dim,
            activation: config.activation,
        };

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let layers = architecture
            .widths()
            .windows(2)
            .map(|w| Layer::xavier(w[0], w[1], &mut rng))
            .collect();

        let matrix = Self {
            architecture,
            layers,
            source_model: source_model.into(),
            target_model: target_model.into(),
        };
        info!(
            source = %matrix.source_model,
            target = %matrix.target_model,
            widths = ?matrix.architecture.widths(),
            activation = %matrix.architecture.activation,
            params = matrix.param_count(),
            "Built W-matrix"
        );
        Ok(matrix)
    }

    /// A single-layer transform that returns its input unchanged.
    pub fn identity(
        dim: usize,
        source_model: impl Into<String>,
        target_model: impl Into<String>,
    ) -> Result<Self> {
        Self::from_layers(
            Architecture {
                input_dim: dim,
                hidden_dims: Vec::new(),
                output_dim: dim,
                activation: Activation::default(),
            },
            vec![Layer::identity(dim)],
            source_model,
            target_model,
        )
    }

    /// Assemble a matrix from explicit layers, checking that they chain.
    pub fn from_layers(
        architecture: Architecture,
        layers: Vec<Layer>,
        source_model: impl Into<String>,
        target_model: impl Into<String>,
    ) -> Result<Self> {
        let matrix = Self {
            architecture,
            layers,
            source_model: source_model.into(),
            target_model: target_model.into(),
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Check that the layers match the architecture and chain without gaps.
    pub fn validate(&self) -> Result<()> {
        let widths = self.architecture.widths();
        if self.layers.len() != widths.len() - 1 {
            return Err(EngineError::dimension(
                "layer count",
                widths.len() - 1,
                self.layers.len(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            layer.check(i)?;
            if layer.in_dim != widths[i] {
                return Err(EngineError::dimension(
                    format!("layer {i} input width"),
                    widths[i],
                    layer.in_dim,
                ));
            }
            if layer.out_dim != widths[i + 1] {
                return Err(EngineError::dimension(
                    format!("layer {i} output width"),
                    widths[i + 1],
                    layer.out_dim,
                ));
            }
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.architecture.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.architecture.output_dim
    }

    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    /// Run a vector through every layer; the final layer has no activation.
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_dim() {
            return Err(EngineError::dimension(
                "alignment input",
                self.input_dim(),
                input.len(),
            ));
        }
        EngineError::check_finite("alignment input", input)?;
        let last = self.layers.len() - 1;
        let mut activations = input.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            activations = layer.affine(&activations);
            if i != last {
                self.architecture.activation.apply_in_place(&mut activations);
            }
        }
        // Finite input can still overflow through large weights.
        EngineError::check_finite("alignment output", &activations)?;
        Ok(activations)
    }

    /// Alignment loss epsilon: squared L2 residual between the aligned source and the target.
    pub fn epsilon(&self, source: &[f32], target: &[f32]) -> Result<f64> {
        if target.len() != self.output_dim() {
            return Err(EngineError::dimension(
                "epsilon target",
                self.output_dim(),
                target.len(),
            ));
        }
        EngineError::check_finite("epsilon target", target)?;
        let aligned = self.forward(source)?;
        Ok(aligned
            .iter()
            .zip(target)
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum())
    }

    /// Serialize into an artifact envelope (JSON payload).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let bytes = encode_envelope(ArtifactKind::WMatrix, &json, None)?;
        debug!(bytes = bytes.len(), params = self.param_count(), "Serialized W-matrix");
        Ok(bytes)
    }

    /// Restore a matrix written by [`WMatrix::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let json = decode_envelope(data, ArtifactKind::WMatrix)?;
        let matrix: WMatrix = serde_json::from_slice(&json)?;
        matrix
            .validate()
            .map_err(|e| EngineError::serialization(format!("stored matrix is malformed: {e}")))?;
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> AlignmentConfig {
        AlignmentConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_architecture_selection() {
        assert_eq!(hidden_dims_for(128, 256, 1000), vec![192]);
        assert_eq!(hidden_dims_for(256, 128, 1000), vec![192]);
        assert_eq!(hidden_dims_for(100, 1300, 1000), vec![500, 900]);
        assert_eq!(hidden_dims_for(1300, 100, 1000), vec![900, 500]);
    }

    #[test]
    fn test_build_chains_layers() {
        let m = WMatrix::build(16, 24, "a", "b", &seeded()).unwrap();
        assert_eq!(m.layers.len(), 2);
        assert_eq!(m.layers[0].in_dim, 16);
        assert_eq!(m.layers[0].out_dim, 20);
        assert_eq!(m.layers[1].out_dim, 24);
        assert!(m.validate().is_ok());
        assert_eq!(m.forward(&[0.5; 16]).unwrap().len(), 24);
    }

    #[test]
    fn test_xavier_scale() {
        let m = WMatrix::build(400, 400, "a", "b", &seeded()).unwrap();
        let w = &m.layers[0].weights;
        let var = w.iter().map(|&x| (x as f64).powi(2)).sum::<f64>() / w.len() as f64;
        // Expected variance 1 / 400.
        assert!((var * 400.0 - 1.0).abs() < 0.05, "variance {var}");
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = WMatrix::build(8, 12, "a", "b", &seeded()).unwrap();
        let b = WMatrix::build(8, 12, "a", "b", &seeded()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_forward() {
        let m = WMatrix::identity(5, "a", "a").unwrap();
        let v = vec![1.0, -2.0, 0.5, 3.0, -0.25];
        assert_eq!(m.forward(&v).unwrap(), v);
        assert_eq!(m.epsilon(&v, &v).unwrap(), 0.0);
    }

    #[test]
    fn test_forward_dimension_mismatch() {
        let m = WMatrix::build(8, 12, "a", "b", &seeded()).unwrap();
        assert!(matches!(
            m.forward(&[1.0; 7]),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_from_layers_rejects_gap() {
        let arch = Architecture {
            input_dim: 4,
            hidden_dims: vec![6],
            output_dim: 4,
            activation: Activation::Relu,
        };
        let layers = vec![Layer::identity(4), Layer::identity(4)];
        assert!(WMatrix::from_layers(arch, layers, "a", "b").is_err());
    }

    #[test]
    fn test_deserialize_rejects_tampered_shape() {
        let mut m = WMatrix::build(4, 6, "a", "b", &seeded()).unwrap();
        m.layers[1].bias.pop();
        let json = serde_json::to_vec(&m).unwrap();
        let bytes = encode_envelope(ArtifactKind::WMatrix, &json, None).unwrap();
        assert!(matches!(
            WMatrix::deserialize(&bytes),
            Err(EngineError::Serialization { .. })
        ));
    }
}
