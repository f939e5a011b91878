//! latent-transfer: moving latent state between models, and checking it.
//!
//! Four independent components, composed by the caller:
//!   compress a KV cache → align vectors into another model's space →
//!   verify a vector source → calibrate vectors against fixed anchors
//!
//! None of the components calls another. Persisted artifacts (compressed
//! caches, W-matrices) share the envelope in [`codec`].

pub mod alignment;
pub mod anchor;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod pool;
pub mod vector;
pub mod verifier;

pub use error::{EngineError, Result};
