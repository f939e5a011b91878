//! Runtime configuration for latent-transfer.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every threshold the four engine components consult lives here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::alignment::activation::Activation;
use crate::error::{EngineError, Result};
use crate::verifier::challenge::PromptCategory;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "latent-transfer",
    about = "Runs the latent transfer pipeline over a synthetic cache and reports the results"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Number of tokens in the synthetic cache.
    #[arg(long, default_value_t = 2048)]
    pub tokens: usize,

    /// Embedding dimension of the synthetic cache.
    #[arg(long, default_value_t = 64)]
    pub dim: usize,

    /// Model whose adapter drives the savings estimate.
    #[arg(long, default_value = "llama-3")]
    pub model: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache compression settings.
    pub compression: CompressionConfig,

    /// Alignment transform settings.
    pub alignment: AlignmentConfig,

    /// Integrity verifier settings.
    pub verifier: VerifierConfig,

    /// Anchor calibration settings.
    pub calibration: CalibrationConfig,

    /// Batch worker pool settings.
    pub workers: WorkerConfig,
}

/// Attention-guided token selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Cumulative attention mass the retained set should reach, in (0, 1].
    pub attention_threshold: f64,

    /// Never retain fewer tokens than this.
    pub min_tokens: usize,

    /// Never retain more tokens than this.
    pub max_tokens: usize,

    /// Restrict attention to the trailing window (sliding-window models).
    pub window_size: Option<usize>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            attention_threshold: 0.90,
            min_tokens: 10,
            max_tokens: 2048,
            window_size: None,
        }
    }
}

impl CompressionConfig {
    /// Checks that hold for every cache length.
    pub fn validate(&self) -> Result<()> {
        if !(self.attention_threshold > 0.0 && self.attention_threshold <= 1.0) {
            return Err(EngineError::invalid_config(format!(
                "attention_threshold must be in (0, 1], got {}",
                self.attention_threshold
            )));
        }
        if self.min_tokens == 0 {
            return Err(EngineError::invalid_config("min_tokens must be >= 1"));
        }
        if self.min_tokens > self.max_tokens {
            return Err(EngineError::invalid_config(format!(
                "min_tokens ({}) exceeds max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.window_size == Some(0) {
            return Err(EngineError::invalid_config("window_size must be >= 1"));
        }
        Ok(())
    }

    /// Check the bounds against a cache of `original_len` tokens.
    pub fn validate_for(&self, original_len: usize) -> Result<()> {
        self.validate()?;
        if self.max_tokens > original_len {
            return Err(EngineError::invalid_config(format!(
                "max_tokens ({}) exceeds cache length ({original_len})",
                self.max_tokens
            )));
        }
        Ok(())
    }

    /// Clamp the token bounds so they are valid for a cache of `len` tokens.
    pub fn fit_to_length(&self, len: usize) -> Self {
        let max_tokens = self.max_tokens.min(len).max(1);
        Self {
            max_tokens,
            min_tokens: self.min_tokens.min(max_tokens).max(1),
            ..self.clone()
        }
    }
}

/// Alignment transform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Activation applied at every hidden layer.
    pub activation: Activation,

    /// Seed for weight initialization (None = entropy).
    pub seed: Option<u64>,

    /// Dimension gap at which two hidden layers are used instead of one.
    pub wide_gap: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Gelu,
            seed: None,
            wide_gap: 1000,
        }
    }
}

/// Proof-of-latent-fidelity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Number of prompts per challenge (spread evenly over the 5 categories).
    pub challenge_size: usize,

    /// Challenge lifetime in milliseconds.
    pub timeout_ms: u64,

    /// Minimum fidelity score to pass.
    pub fidelity_threshold: f64,

    /// Maximum tolerated anomaly severity, as a fraction of the challenge size.
    pub anomaly_threshold: f64,

    /// Cosine similarity above which two responses count as copies.
    pub similarity_ceiling: f64,

    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            challenge_size: 10,
            timeout_ms: 30_000,
            fidelity_threshold: 0.85,
            anomaly_threshold: 0.15,
            similarity_ceiling: 0.98,
            sweep_interval_ms: 5_000,
        }
    }
}

impl VerifierConfig {
    pub fn validate(&self) -> Result<()> {
        let capacity = PromptCategory::capacity();
        if self.challenge_size == 0 || self.challenge_size > capacity {
            return Err(EngineError::invalid_config(format!(
                "challenge_size must be in 1..={capacity}, got {}",
                self.challenge_size
            )));
        }
        for (name, value) in [
            ("fidelity_threshold", self.fidelity_threshold),
            ("anomaly_threshold", self.anomaly_threshold),
            ("similarity_ceiling", self.similarity_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::invalid_config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Anchor calibration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Number of nearest anchors consulted by `calibrate`.
    pub top_k: usize,

    /// Scores below this produce a recommendation.
    pub score_floor: f64,

    /// Coverage below this produces a recommendation.
    pub coverage_floor: f64,

    /// Dimension of the built-in hashing embedder.
    pub embedding_dim: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_floor: 0.5,
            coverage_floor: 0.25,
            embedding_dim: 256,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(EngineError::invalid_config("top_k must be >= 1"));
        }
        if self.embedding_dim == 0 {
            return Err(EngineError::invalid_config("embedding_dim must be >= 1"));
        }
        Ok(())
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads (0 = one per CPU core).
    pub num_threads: usize,
}

impl WorkerConfig {
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Validate the sections that can be checked without input data.
    pub fn validate(&self) -> Result<()> {
        self.compression.validate()?;
        self.verifier.validate()?;
        self.calibration.validate()?;
        Ok(())
    }
}
