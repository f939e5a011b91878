//! Compression metrics and quality validation.
//!
//! Quality is a soft signal: a failed check is reported with warnings and
//! recommendations, never raised as an error.

use serde::{Deserialize, Serialize};

use crate::cache::adapter::ModelAdapter;
use crate::cache::kv::CompressedHead;
use crate::config::CompressionConfig;
use crate::error::{EngineError, Result};

/// Bytes per f32 component, counted for keys and values.
const BYTES_PER_COMPONENT: usize = std::mem::size_of::<f32>();
/// Power-law exponent assumed for attention weights sorted by rank.
const ESTIMATE_DECAY: f64 = 1.5;

/// Transport savings realized by one compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetrics {
    pub total_tokens: usize,
    pub selected_tokens: usize,
    pub compression_ratio: f64,
    pub bandwidth_savings_bytes: usize,
    pub bandwidth_savings_percent: f64,
    pub cumulative_attention: f64,
}

impl CompressionMetrics {
    pub fn from_head(head: &CompressedHead) -> Self {
        let per_token = 2 * head.dim() * BYTES_PER_COMPONENT;
        let dropped = head.original_len.saturating_sub(head.retained());
        let ratio = head.compression_ratio();
        Self {
            total_tokens: head.original_len,
            selected_tokens: head.retained(),
            compression_ratio: ratio,
            bandwidth_savings_bytes: dropped * per_token,
            bandwidth_savings_percent: (1.0 - ratio) * 100.0,
            cumulative_attention: head.attention_mass,
        }
    }

    /// Predict the savings of compressing `tokens` tokens of width `dim`
    /// for the adapter's model, without touching any cache.
    ///
    /// Sorted attention is assumed to decay as `rank^-1.5` over the scored
    /// tokens (the trailing window for sliding-window models). The estimate
    /// keeps the smallest prefix whose mass reaches `threshold`, defaulting
    /// to the adapter's recommended threshold.
    pub fn estimate(
        adapter: &ModelAdapter,
        tokens: usize,
        dim: usize,
        threshold: Option<f64>,
    ) -> Result<Self> {
        if tokens == 0 || dim == 0 {
            return Err(EngineError::empty(format!(
                "cannot estimate savings for {tokens} tokens of width {dim}"
            )));
        }
        let threshold = threshold.unwrap_or(adapter.recommended_threshold);
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EngineError::invalid_config(format!(
                "attention_threshold must be in (0, 1], got {threshold}"
            )));
        }

        let scored = adapter.window_size.map_or(tokens, |w| w.min(tokens)).max(1);
        let weights: Vec<f64> = (1..=scored)
            .map(|rank| (rank as f64).powf(-ESTIMATE_DECAY))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut mass = 0.0;
        let mut selected = 0;
        for w in &weights {
            if mass / total + 1e-9 >= threshold {
                break;
            }
            mass += w;
            selected += 1;
        }

        let per_token = 2 * dim * BYTES_PER_COMPONENT;
        let ratio = selected as f64 / tokens as f64;
        Ok(Self {
            total_tokens: tokens,
            selected_tokens: selected,
            compression_ratio: ratio,
            bandwidth_savings_bytes: (tokens - selected) * per_token,
            bandwidth_savings_percent: (1.0 - ratio) * 100.0,
            cumulative_attention: mass / total,
        })
    }
}

/// Outcome of [`validate_quality`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub passed: bool,
    pub attention_coverage: f64,
    pub information_loss: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Judge whether a compressed head kept enough attention mass.
///
/// Passing requires the retained mass to reach the configured threshold.
pub fn validate_quality(head: &CompressedHead, config: &CompressionConfig) -> QualityReport {
    let coverage = head.attention_mass.clamp(0.0, 1.0);
    let ratio = head.compression_ratio();
    let passed = coverage + 1e-9 >= config.attention_threshold;
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if !passed && head.retained() >= config.max_tokens {
        warnings.push(format!(
            "max_tokens ({}) reached with only {:.1}% attention coverage",
            config.max_tokens,
            coverage * 100.0
        ));
        recommendations.push("raise max_tokens to retain more of the attention mass".to_string());
    } else if !passed {
        warnings.push(format!(
            "attention coverage {:.1}% below threshold {:.1}%",
            coverage * 100.0,
            config.attention_threshold * 100.0
        ));
    }

    if ratio > 0.8 {
        recommendations.push(format!(
            "attention is diffuse ({:.0}% of tokens kept); a lower threshold would save more bandwidth",
            ratio * 100.0
        ));
    }
    if head.retained() == config.min_tokens && coverage > 0.999 && config.min_tokens > 1 {
        recommendations.push(
            "min_tokens floor dominates the selection; lowering it would shrink the cache further"
                .to_string(),
        );
    }

    QualityReport {
        passed,
        attention_coverage: coverage,
        information_loss: 1.0 - coverage,
        warnings,
        recommendations,
    }
}
