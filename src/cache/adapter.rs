//! Model-specific compression adapters.
//!
//! Different model families distribute attention differently, so each gets a
//! recommended attention threshold. Sliding-window models also carry their
//! window size, which restricts attention scoring to the trailing tokens.

use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;

/// Attention mechanism of a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionType {
    MultiHead,
    GroupedQuery,
    MultiQuery,
    SlidingWindow,
}

impl std::fmt::Display for AttentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionType::MultiHead => write!(f, "multi-head"),
            AttentionType::GroupedQuery => write!(f, "grouped-query"),
            AttentionType::MultiQuery => write!(f, "multi-query"),
            AttentionType::SlidingWindow => write!(f, "sliding-window"),
        }
    }
}

/// Compression profile for one model family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAdapter {
    /// Model name prefix this adapter matches (lowercase).
    pub prefix: &'static str,
    pub family: &'static str,
    pub attention_type: AttentionType,
    pub recommended_threshold: f64,
    pub window_size: Option<usize>,
}

/// Longer prefixes come first so the most specific match wins.
const ADAPTERS: &[ModelAdapter] = &[
    ModelAdapter {
        prefix: "gpt-3.5",
        family: "gpt",
        attention_type: AttentionType::MultiHead,
        recommended_threshold: 0.88,
        window_size: None,
    },
    ModelAdapter {
        prefix: "gpt-4",
        family: "gpt",
        attention_type: AttentionType::MultiHead,
        recommended_threshold: 0.92,
        window_size: None,
    },
    ModelAdapter {
        prefix: "claude-3",
        family: "claude",
        attention_type: AttentionType::MultiHead,
        recommended_threshold: 0.92,
        window_size: None,
    },
    ModelAdapter {
        prefix: "llama-2",
        family: "llama",
        attention_type: AttentionType::MultiHead,
        recommended_threshold: 0.90,
        window_size: None,
    },
    ModelAdapter {
        prefix: "llama-3",
        family: "llama",
        attention_type: AttentionType::GroupedQuery,
        recommended_threshold: 0.90,
        window_size: None,
    },
    ModelAdapter {
        prefix: "mistral",
        family: "mistral",
        attention_type: AttentionType::SlidingWindow,
        recommended_threshold: 0.85,
        window_size: Some(4096),
    },
    ModelAdapter {
        prefix: "mixtral",
        family: "mistral",
        attention_type: AttentionType::SlidingWindow,
        recommended_threshold: 0.85,
        window_size: Some(4096),
    },
    ModelAdapter {
        prefix: "gemma",
        family: "gemma",
        attention_type: AttentionType::MultiQuery,
        recommended_threshold: 0.88,
        window_size: None,
    },
    ModelAdapter {
        prefix: "qwen",
        family: "qwen",
        attention_type: AttentionType::GroupedQuery,
        recommended_threshold: 0.90,
        window_size: None,
    },
    ModelAdapter {
        prefix: "falcon",
        family: "falcon",
        attention_type: AttentionType::MultiQuery,
        recommended_threshold: 0.87,
        window_size: None,
    },
];

/// Generic profile for models with no registered adapter.
static FALLBACK: ModelAdapter = ModelAdapter {
    prefix: "",
    family: "generic",
    attention_type: AttentionType::MultiHead,
    recommended_threshold: 0.90,
    window_size: None,
};

/// Every registered adapter.
pub fn supported_models() -> &'static [ModelAdapter] {
    ADAPTERS
}

/// Look up the adapter for a model name; unknown models get the generic profile.
pub fn adapter_for(model_name: &str) -> &'static ModelAdapter {
    let name = model_name.to_ascii_lowercase();
    ADAPTERS
        .iter()
        .find(|a| name.starts_with(a.prefix))
        .unwrap_or(&FALLBACK)
}

impl CompressionConfig {
    /// Apply a model's recommended threshold and window on top of `self`.
    pub fn for_model(&self, model_name: &str) -> Self {
        let adapter = adapter_for(model_name);
        Self {
            attention_threshold: adapter.recommended_threshold,
            window_size: adapter.window_size.or(self.window_size),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_lookup() {
        assert_eq!(adapter_for("GPT-4-turbo").family, "gpt");
        assert_eq!(adapter_for("gpt-3.5-turbo").recommended_threshold, 0.88);
        assert_eq!(
            adapter_for("llama-3-8b").attention_type,
            AttentionType::GroupedQuery
        );
        assert_eq!(adapter_for("unknown-model").family, "generic");
    }

    #[test]
    fn test_for_model_sets_window() {
        let cfg = CompressionConfig::default().for_model("mistral-7b");
        assert_eq!(cfg.window_size, Some(4096));
        assert_eq!(cfg.attention_threshold, 0.85);
        assert_eq!(cfg.min_tokens, 10);
    }
}
