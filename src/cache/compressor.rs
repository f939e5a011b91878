//! Attention-guided KV cache compression.
//!
//! Each head is scored by the softmax attention its queries (or, absent
//! queries, the mean key) pay to every token. Tokens are taken in descending
//! weight order until the cumulative mass reaches the configured threshold,
//! bounded by `min_tokens` and `max_tokens`, then emitted in their original
//! causal order. Decompression is lossy: dropped positions come back as zeros.

use tracing::debug;

use crate::cache::kv::{CompressedCache, CompressedHead, DecompressedHead, KvCache, KvHead};
use crate::config::CompressionConfig;
use crate::error::{EngineError, Result};
use crate::vector;

/// Slack for comparing accumulated attention against the threshold.
const MASS_EPSILON: f64 = 1e-9;

/// The compression engine.
#[derive(Debug, Clone)]
pub struct AttentionCompressor {
    config: CompressionConfig,
}

impl AttentionCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Per-token attention weights for one head; sums to 1.
    ///
    /// With several queries the per-query distributions are averaged.
    /// Tokens outside the trailing window (if any) get weight 0.
    pub fn attention_weights(&self, head: &KvHead) -> Result<Vec<f64>> {
        head.validate()?;
        let n = head.len();
        let scale = 1.0 / (head.dim() as f64).sqrt();
        let start = match self.config.window_size {
            Some(window) => n.saturating_sub(window),
            None => 0,
        };
        let window_keys = &head.keys[start..];

        let mean_query;
        let queries: &[Vec<f32>] = match &head.queries {
            Some(q) if !q.is_empty() => q,
            _ => {
                mean_query = [vector::centroid(window_keys)];
                &mean_query
            }
        };

        let mut weights = vec![0.0f64; n];
        for query in queries {
            let logits: Vec<f64> = window_keys
                .iter()
                .map(|k| vector::dot(query, k) * scale)
                .collect();
            for (w, p) in weights[start..].iter_mut().zip(vector::softmax(&logits)) {
                *w += p;
            }
        }
        let count = queries.len() as f64;
        weights.iter_mut().for_each(|w| *w /= count);
        Ok(weights)
    }

    /// Compress one head.
    pub fn compress(&self, head: &KvHead) -> Result<CompressedHead> {
        if head.is_empty() {
            return Err(EngineError::empty("KV head has no keys"));
        }
        self.config.validate_for(head.len())?;

        let weights = self.attention_weights(head)?;
        let retained_indices = self.select(&weights);
        let attention_mass = retained_indices.iter().map(|&i| weights[i]).sum::<f64>();

        let keys = retained_indices.iter().map(|&i| head.keys[i].clone()).collect();
        let values = retained_indices
            .iter()
            .map(|&i| head.values[i].clone())
            .collect();

        debug!(
            original = head.len(),
            retained = retained_indices.len(),
            attention_mass,
            "Compressed head"
        );

        Ok(CompressedHead {
            keys,
            values,
            retained_indices,
            original_len: head.len(),
            attention_mass,
        })
    }

    /// Compress every head of a cache. Each head selects its own tokens.
    pub fn compress_cache(&self, cache: &KvCache) -> Result<CompressedCache> {
        let original_len = cache.token_len();
        self.config.validate_for(original_len)?;

        let layers = cache
            .layers
            .iter()
            .map(|layer| layer.iter().map(|head| self.compress(head)).collect())
            .collect::<Result<Vec<Vec<CompressedHead>>>>()?;

        let compressed = CompressedCache {
            layers,
            original_len,
            dim: cache.dim(),
        };
        debug!(
            layers = cache.num_layers(),
            original_len,
            ratio = compressed.compression_ratio(),
            attention_mass = compressed.attention_mass(),
            "Compressed cache"
        );
        Ok(compressed)
    }

    /// Pick the retained token positions, returned in ascending order.
    fn select(&self, weights: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..weights.len()).collect();
        // Stable sort: equal weights keep causal order.
        order.sort_by(|&a, &b| {
            weights[b]
                .partial_cmp(&weights[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let target = self.config.attention_threshold - MASS_EPSILON;
        let mut cumulative = 0.0;
        let mut count = 0;
        for &idx in &order {
            if cumulative >= target {
                break;
            }
            cumulative += weights[idx];
            count += 1;
        }
        let count = count
            .max(self.config.min_tokens)
            .min(self.config.max_tokens)
            .min(weights.len());

        let mut retained = order[..count].to_vec();
        retained.sort_unstable();
        retained
    }
}

/// Rebuild full-length key/value arrays, zero-filling dropped positions.
pub fn decompress(compressed: &CompressedHead, original_len: usize) -> Result<DecompressedHead> {
    let retained = compressed.retained();
    if retained == 0 {
        return Err(EngineError::empty("compressed head retains no tokens"));
    }
    if compressed.keys.len() != retained {
        return Err(EngineError::dimension(
            "compressed key count",
            retained,
            compressed.keys.len(),
        ));
    }
    if compressed.values.len() != retained {
        return Err(EngineError::dimension(
            "compressed value count",
            retained,
            compressed.values.len(),
        ));
    }
    if compressed
        .retained_indices
        .windows(2)
        .any(|pair| pair[0] >= pair[1])
    {
        return Err(EngineError::invalid_config(
            "retained indices must be strictly increasing",
        ));
    }
    let last = compressed.retained_indices[retained - 1];
    if last >= original_len {
        return Err(EngineError::dimension(
            "decompressed length",
            last + 1,
            original_len,
        ));
    }

    let dim = compressed.dim();
    let mut keys = vec![vec![0.0f32; dim]; original_len];
    let mut values = vec![vec![0.0f32; dim]; original_len];
    for (slot, &idx) in compressed.retained_indices.iter().enumerate() {
        let (k, v) = (&compressed.keys[slot], &compressed.values[slot]);
        if k.len() != dim || v.len() != dim {
            return Err(EngineError::dimension(
                format!("retained vector {slot}"),
                dim,
                k.len().max(v.len()),
            ));
        }
        keys[idx] = k.clone();
        values[idx] = v.clone();
    }

    debug!(retained, original_len, "Decompressed head");
    Ok(DecompressedHead { keys, values })
}

/// Decompress every head of a cache to its recorded original length.
pub fn decompress_cache(compressed: &CompressedCache) -> Result<Vec<Vec<DecompressedHead>>> {
    compressed
        .layers
        .iter()
        .map(|layer| {
            layer
                .iter()
                .map(|head| decompress(head, compressed.original_len))
                .collect()
        })
        .collect()
}
