//! Fitting a W-matrix against paired source/target embeddings.
//!
//! Full-batch gradient descent on mean squared error, backpropagating through
//! every layer. The input matrix is left untouched; a new one is returned.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alignment::spectrum;
use crate::alignment::wmatrix::WMatrix;
use crate::error::{EngineError, Result};

/// Gradient descent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub learning_rate: f32,
    pub epochs: usize,
    /// Stop early once the loss drops below this.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs: 200,
            tolerance: 1e-6,
        }
    }
}

/// Summary of a fitting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub initial_loss: f64,
    pub final_loss: f64,
    pub epochs_run: usize,
    /// Spectral similarity of the pair sources and their fitted images, in [0, 1].
    pub information_retention: f64,
}

/// One training example: a source vector and the target it should map to.
pub type AlignmentPair = (Vec<f32>, Vec<f32>);

/// Pre-activations and activations recorded during a forward pass.
struct Trace {
    /// `inputs[l]` is the input to layer `l`.
    inputs: Vec<Vec<f32>>,
    /// `pre[l]` is `W_l inputs[l] + b_l`.
    pre: Vec<Vec<f32>>,
    output: Vec<f32>,
}

fn trace(matrix: &WMatrix, input: &[f32]) -> Trace {
    let last = matrix.layers.len() - 1;
    let activation = matrix.architecture.activation;
    let mut inputs = Vec::with_capacity(matrix.layers.len());
    let mut pre = Vec::with_capacity(matrix.layers.len());
    let mut current = input.to_vec();
    for (i, layer) in matrix.layers.iter().enumerate() {
        let z = layer.affine(&current);
        let next = if i == last {
            z.clone()
        } else {
            z.iter().map(|&x| activation.apply(x)).collect()
        };
        inputs.push(current);
        pre.push(z);
        current = next;
    }
    Trace {
        inputs,
        pre,
        output: current,
    }
}

fn mse(matrix: &WMatrix, pairs: &[AlignmentPair]) -> f64 {
    let total: f64 = pairs
        .iter()
        .map(|(x, y)| {
            trace(matrix, x)
                .output
                .iter()
                .zip(y)
                .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
                .sum::<f64>()
        })
        .sum();
    total / (pairs.len() * matrix.output_dim()) as f64
}

fn check_pairs(matrix: &WMatrix, pairs: &[AlignmentPair]) -> Result<()> {
    if pairs.is_empty() {
        return Err(EngineError::empty("no alignment pairs to fit"));
    }
    for (i, (x, y)) in pairs.iter().enumerate() {
        if x.len() != matrix.input_dim() {
            return Err(EngineError::dimension(
                format!("pair {i} source"),
                matrix.input_dim(),
                x.len(),
            ));
        }
        if y.len() != matrix.output_dim() {
            return Err(EngineError::dimension(
                format!("pair {i} target"),
                matrix.output_dim(),
                y.len(),
            ));
        }
        EngineError::check_finite(format!("pair {i} source"), x)?;
        EngineError::check_finite(format!("pair {i} target"), y)?;
    }
    Ok(())
}

/// Fit `matrix` to `pairs`, returning a new matrix and a report.
pub fn fit(
    matrix: &WMatrix,
    pairs: &[AlignmentPair],
    options: &FitOptions,
) -> Result<(WMatrix, FitReport)> {
    check_pairs(matrix, pairs)?;
    if !(options.learning_rate > 0.0 && options.learning_rate.is_finite()) {
        return Err(EngineError::invalid_config(format!(
            "learning_rate must be positive, got {}",
            options.learning_rate
        )));
    }

    let mut fitted = matrix.clone();
    let activation = fitted.architecture.activation;
    let scale = 2.0 / (pairs.len() * fitted.output_dim()) as f32;
    let initial_loss = mse(&fitted, pairs);
    let mut loss = initial_loss;
    let mut epochs_run = 0;

    while epochs_run < options.epochs && loss > options.tolerance {
        let mut grad_w: Vec<Vec<f32>> = fitted
            .layers
            .iter()
            .map(|l| vec![0.0; l.weights.len()])
            .collect();
        let mut grad_b: Vec<Vec<f32>> = fitted
            .layers
            .iter()
            .map(|l| vec![0.0; l.bias.len()])
            .collect();

        for (x, y) in pairs {
            let t = trace(&fitted, x);
            let mut delta: Vec<f32> = t
                .output
                .iter()
                .zip(y)
                .map(|(&a, &b)| scale * (a - b))
                .collect();

            for l in (0..fitted.layers.len()).rev() {
                let layer = &fitted.layers[l];
                let input = &t.inputs[l];
                for (o, &d) in delta.iter().enumerate() {
                    grad_b[l][o] += d;
                    let row = &mut grad_w[l][o * layer.in_dim..(o + 1) * layer.in_dim];
                    for (g, &a) in row.iter_mut().zip(input) {
                        *g += d * a;
                    }
                }
                if l > 0 {
                    let mut back = vec![0.0f32; layer.in_dim];
                    for (o, &d) in delta.iter().enumerate() {
                        let row = &layer.weights[o * layer.in_dim..(o + 1) * layer.in_dim];
                        for (b, &w) in back.iter_mut().zip(row) {
                            *b += w * d;
                        }
                    }
                    delta = back
                        .into_iter()
                        .zip(&t.pre[l - 1])
                        .map(|(b, &z)| b * activation.derivative(z))
                        .collect();
                }
            }
        }

        for (layer, (gw, gb)) in fitted
            .layers
            .iter_mut()
            .zip(grad_w.iter().zip(grad_b.iter()))
        {
            for (w, g) in layer.weights.iter_mut().zip(gw) {
                *w -= options.learning_rate * g;
            }
            for (b, g) in layer.bias.iter_mut().zip(gb) {
                *b -= options.learning_rate * g;
            }
        }

        epochs_run += 1;
        loss = mse(&fitted, pairs);
        if !loss.is_finite() {
            return Err(EngineError::invalid_config(format!(
                "fit diverged at epoch {epochs_run}; lower the learning rate"
            )));
        }
        debug!(epoch = epochs_run, loss, "Fit epoch");
    }

    let sources: Vec<Vec<f32>> = pairs.iter().map(|(x, _)| x.clone()).collect();
    let images = sources
        .iter()
        .map(|x| fitted.forward(x))
        .collect::<Result<Vec<_>>>()?;
    let information_retention = spectrum::information_retention(&sources, &images)?;

    info!(
        source = %fitted.source_model,
        target = %fitted.target_model,
        pairs = pairs.len(),
        initial_loss,
        final_loss = loss,
        epochs_run,
        information_retention,
        "Fitted W-matrix"
    );

    Ok((
        fitted,
        FitReport {
            initial_loss,
            final_loss: loss,
            epochs_run,
            information_retention,
        },
    ))
}

impl WMatrix {
    pub fn fit(
        &self,
        pairs: &[AlignmentPair],
        options: &FitOptions,
    ) -> Result<(WMatrix, FitReport)> {
        fit(self, pairs, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlignmentConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pairs(n: usize, dim: usize) -> Vec<AlignmentPair> {
        let mut rng = StdRng::seed_from_u64(11);
        (0..n)
            .map(|_| {
                let x: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let y = x.iter().rev().map(|v| 0.5 * v).collect();
                (x, y)
            })
            .collect()
    }

    #[test]
    fn test_fit_reduces_loss_and_keeps_original() {
        let cfg = AlignmentConfig {
            seed: Some(3),
            ..Default::default()
        };
        let original = WMatrix::build(6, 6, "a", "b", &cfg).unwrap();
        let data = pairs(32, 6);
        let options = FitOptions {
            learning_rate: 0.2,
            epochs: 400,
            ..Default::default()
        };
        let (fitted, report) = original.fit(&data, &options).unwrap();

        assert!(report.final_loss < report.initial_loss * 0.5, "{report:?}");
        assert!((0.0..=1.0).contains(&report.information_retention));
        assert_ne!(fitted, original);
        assert_eq!(original, WMatrix::build(6, 6, "a", "b", &cfg).unwrap());
    }

    #[test]
    fn test_fit_rejects_bad_pairs() {
        let m = WMatrix::identity(3, "a", "b").unwrap();
        assert!(matches!(
            m.fit(&[], &FitOptions::default()),
            Err(EngineError::EmptyInput { .. })
        ));
        let bad = vec![(vec![1.0; 3], vec![1.0; 2])];
        assert!(matches!(
            m.fit(&bad, &FitOptions::default()),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_identity_already_fits() {
        let m = WMatrix::identity(4, "a", "b").unwrap();
        let data: Vec<AlignmentPair> = pairs(8, 4)
            .into_iter()
            .map(|(x, _)| (x.clone(), x))
            .collect();
        let (_, report) = m.fit(&data, &FitOptions::default()).unwrap();
        assert_eq!(report.epochs_run, 0);
        assert!(report.final_loss <= 1e-6);
        assert!((report.information_retention - 1.0).abs() < 1e-6);
    }
}
