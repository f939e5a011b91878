//! Semantic anchor calibration.
//!
//! - [`catalogue`]: the 1,024 fixed anchors and the process-wide instance
//! - [`embedding`]: the `EmbeddingProvider` seam and a hashing fallback
//! - [`calibrator`]: nearest-anchor search and calibration reports

pub mod calibrator;
pub mod catalogue;
pub mod embedding;

pub use calibrator::{AnchorMatch, CalibrationResult, Calibrator};
pub use catalogue::{AnchorCatalogue, AnchorCategory, AnchorRecord};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
