//! Hidden-layer activations.

use serde::{Deserialize, Serialize};

/// sqrt(2 / pi), used by the tanh approximation of GELU.
const GELU_COEFF: f32 = 0.797_884_6;
const GELU_CUBIC: f32 = 0.044_715;

/// Activation applied after every hidden affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Gelu,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Gelu => {
                let inner = GELU_COEFF * (x + GELU_CUBIC * x * x * x);
                0.5 * x * (1.0 + inner.tanh())
            }
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Derivative with respect to the pre-activation input.
    pub fn derivative(self, x: f32) -> f32 {
        match self {
            Activation::Gelu => {
                let inner = GELU_COEFF * (x + GELU_CUBIC * x * x * x);
                let t = inner.tanh();
                let d_inner = GELU_COEFF * (1.0 + 3.0 * GELU_CUBIC * x * x);
                0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * d_inner
            }
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::Sigmoid => {
                let s = Activation::Sigmoid.apply(x);
                s * (1.0 - s)
            }
        }
    }

    pub fn apply_in_place(self, xs: &mut [f32]) {
        xs.iter_mut().for_each(|x| *x = self.apply(*x));
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Gelu => write!(f, "gelu"),
            Activation::Relu => write!(f, "relu"),
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
        }
    }
}
