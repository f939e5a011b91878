//! KV cache types.
//!
//! A [`KvCache`] holds one [`KvHead`] per (layer, head) pair. Every head in a
//! cache shares the same token length and embedding dimension. Compression
//! never mutates these; it produces a [`CompressedCache`].

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Keys, values and optional queries for one attention head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvHead {
    pub keys: Vec<Vec<f32>>,
    pub values: Vec<Vec<f32>>,
    pub queries: Option<Vec<Vec<f32>>>,
}

impl KvHead {
    /// Build a head, checking that keys and values line up.
    pub fn new(
        keys: Vec<Vec<f32>>,
        values: Vec<Vec<f32>>,
        queries: Option<Vec<Vec<f32>>>,
    ) -> Result<Self> {
        let head = Self {
            keys,
            values,
            queries,
        };
        head.validate()?;
        Ok(head)
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Embedding dimension (0 for an empty head).
    pub fn dim(&self) -> usize {
        self.keys.first().map(Vec::len).unwrap_or(0)
    }

    /// Check the shape invariants (non-empty, `len(keys) == len(values)`, one
    /// dimension throughout) and that every component is finite.
    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(EngineError::empty("KV head has no keys"));
        }
        if self.values.len() != self.keys.len() {
            return Err(EngineError::dimension(
                "value count",
                self.keys.len(),
                self.values.len(),
            ));
        }
        let dim = self.dim();
        if dim == 0 {
            return Err(EngineError::empty("key vectors have zero dimension"));
        }
        for (i, (k, v)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if k.len() != dim {
                return Err(EngineError::dimension(format!("key {i}"), dim, k.len()));
            }
            if v.len() != dim {
                return Err(EngineError::dimension(format!("value {i}"), dim, v.len()));
            }
            EngineError::check_finite(format!("key {i}"), k)?;
            EngineError::check_finite(format!("value {i}"), v)?;
        }
        if let Some(queries) = &self.queries {
            for (i, q) in queries.iter().enumerate() {
                if q.len() != dim {
                    return Err(EngineError::dimension(format!("query {i}"), dim, q.len()));
                }
                EngineError::check_finite(format!("query {i}"), q)?;
            }
        }
        Ok(())
    }
}

/// A full cache: `layers[l][h]` is the head `h` of layer `l`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvCache {
    pub layers: Vec<Vec<KvHead>>,
}

impl KvCache {
    /// Build a cache, checking that all heads share one token length and dimension.
    pub fn new(layers: Vec<Vec<KvHead>>) -> Result<Self> {
        let first = layers
            .iter()
            .flatten()
            .next()
            .ok_or_else(|| EngineError::empty("KV cache has no heads"))?;
        let (len, dim) = (first.len(), first.dim());

        for (l, layer) in layers.iter().enumerate() {
            for (h, head) in layer.iter().enumerate() {
                head.validate()?;
                if head.len() != len {
                    return Err(EngineError::dimension(
                        format!("token length of layer {l} head {h}"),
                        len,
                        head.len(),
                    ));
                }
                if head.dim() != dim {
                    return Err(EngineError::dimension(
                        format!("dimension of layer {l} head {h}"),
                        dim,
                        head.dim(),
                    ));
                }
            }
        }
        Ok(Self { layers })
    }

    /// Token length shared by every head.
    pub fn token_len(&self) -> usize {
        self.heads().next().map(KvHead::len).unwrap_or(0)
    }

    pub fn dim(&self) -> usize {
        self.heads().next().map(KvHead::dim).unwrap_or(0)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Iterate heads in layer-major order.
    pub fn heads(&self) -> impl Iterator<Item = &KvHead> {
        self.layers.iter().flatten()
    }
}

/// The retained subset of one head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedHead {
    pub keys: Vec<Vec<f32>>,
    pub values: Vec<Vec<f32>>,

    /// Original positions of the retained tokens, strictly ascending.
    pub retained_indices: Vec<usize>,

    /// Token length before compression.
    pub original_len: usize,

    /// Attention mass captured by the retained set.
    pub attention_mass: f64,
}

impl CompressedHead {
    pub fn retained(&self) -> usize {
        self.retained_indices.len()
    }

    /// `retained / original`.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_len == 0 {
            return 0.0;
        }
        self.retained() as f64 / self.original_len as f64
    }

    pub fn dim(&self) -> usize {
        self.keys.first().map(Vec::len).unwrap_or(0)
    }
}

/// Compression output for a whole cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedCache {
    pub layers: Vec<Vec<CompressedHead>>,
    pub original_len: usize,
    pub dim: usize,
}

impl CompressedCache {
    pub fn heads(&self) -> impl Iterator<Item = &CompressedHead> {
        self.layers.iter().flatten()
    }

    /// Retained tokens summed over every head.
    pub fn retained_tokens(&self) -> usize {
        self.heads().map(CompressedHead::retained).sum()
    }

    /// Realized ratio over the whole cache.
    pub fn compression_ratio(&self) -> f64 {
        let heads = self.heads().count();
        if heads == 0 || self.original_len == 0 {
            return 0.0;
        }
        self.retained_tokens() as f64 / (heads * self.original_len) as f64
    }

    /// Mean attention mass across heads.
    pub fn attention_mass(&self) -> f64 {
        let heads = self.heads().count();
        if heads == 0 {
            return 0.0;
        }
        self.heads().map(|h| h.attention_mass).sum::<f64>() / heads as f64
    }
}

/// Reconstructed keys and values at full length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecompressedHead {
    pub keys: Vec<Vec<f32>>,
    pub values: Vec<Vec<f32>>,
}
