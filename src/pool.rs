//! Bounded worker pool for batch operations.
//!
//! Every batch item is independent, so batches are split across a dedicated
//! rayon pool. Results come back in input order; the first error wins.

use rayon::prelude::*;
use tracing::debug;

use crate::alignment::align::AlignmentResult;
use crate::alignment::wmatrix::WMatrix;
use crate::anchor::calibrator::{CalibrationResult, Calibrator};
use crate::cache::compressor::AttentionCompressor;
use crate::cache::kv::{CompressedCache, CompressedHead, KvCache, KvHead};
use crate::config::WorkerConfig;
use crate::error::{EngineError, Result};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let threads = config.effective_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("latent-worker-{i}"))
            .build()
            .map_err(|e| EngineError::invalid_config(format!("worker pool: {e}")))?;
        debug!(threads, "Worker pool ready");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn compress_heads(
        &self,
        compressor: &AttentionCompressor,
        heads: &[KvHead],
    ) -> Result<Vec<CompressedHead>> {
        self.pool
            .install(|| heads.par_iter().map(|h| compressor.compress(h)).collect())
    }

    /// Parallel equivalent of [`AttentionCompressor::compress_cache`].
    pub fn compress_cache(
        &self,
        compressor: &AttentionCompressor,
        cache: &KvCache,
    ) -> Result<CompressedCache> {
        let original_len = cache.token_len();
        compressor.config().validate_for(original_len)?;
        let layers = self.pool.install(|| {
            cache
                .layers
                .par_iter()
                .map(|layer| layer.par_iter().map(|h| compressor.compress(h)).collect())
                .collect::<Result<Vec<Vec<CompressedHead>>>>()
        })?;
        Ok(CompressedCache {
            layers,
            original_len,
            dim: cache.dim(),
        })
    }

    pub fn align_batch(
        &self,
        matrix: &WMatrix,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<AlignmentResult>> {
        self.pool
            .install(|| vectors.par_iter().map(|v| matrix.align(v, None)).collect())
    }

    pub fn calibrate_batch(
        &self,
        calibrator: &Calibrator,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<CalibrationResult>> {
        self.pool
            .install(|| vectors.par_iter().map(|v| calibrator.calibrate(v)).collect())
    }
}
