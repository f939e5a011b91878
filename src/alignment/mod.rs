//! Cross-model alignment transforms.
//!
//! - [`activation`]: the closed set of hidden-layer activations
//! - [`wmatrix`]: WMatrix, Layer, Architecture; building and persistence
//! - [`align`]: applying a matrix to a vector and scoring the result
//! - [`fit`]: gradient-descent fitting against paired embeddings
//! - [`spectrum`]: singular-value spectra and information retention

pub mod activation;
pub mod align;
pub mod fit;
pub mod spectrum;
pub mod wmatrix;

pub use activation::Activation;
pub use align::AlignmentResult;
pub use fit::{FitOptions, FitReport};
pub use wmatrix::WMatrix;
