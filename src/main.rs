//! latent-transfer: runs the engine end to end over synthetic data.
//!
//! Builds a cache with a few hot tokens, compresses it, aligns the retained
//! keys into a wider space, answers an integrity challenge and calibrates
//! the result against the anchor catalogue, logging each report.

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use latent_transfer::alignment::WMatrix;
use latent_transfer::anchor::catalogue;
use latent_transfer::anchor::{Calibrator, EmbeddingProvider, HashingEmbedder};
use latent_transfer::cache::adapter::adapter_for;
use latent_transfer::cache::compressor::{decompress_cache, AttentionCompressor};
use latent_transfer::cache::kv::{CompressedCache, KvCache, KvHead};
use latent_transfer::cache::quality::{validate_quality, CompressionMetrics};
use latent_transfer::codec::EncodeOptions;
use latent_transfer::config::{Cli, Config};
use latent_transfer::pool::WorkerPool;
use latent_transfer::verifier::{ChallengeResponse, IntegrityVerifier};

const HEADS: usize = 4;
const HOT_EVERY: usize = 20;

/// One head whose query singles out every `HOT_EVERY`-th token.
fn synthetic_head(rng: &mut StdRng, tokens: usize, dim: usize) -> anyhow::Result<KvHead> {
    let mut query = vec![0.0f32; dim];
    query[0] = 8.0;
    let keys = (0..tokens)
        .map(|i| {
            let mut k: Vec<f32> = (0..dim).map(|_| rng.gen_range(-0.1..0.1)).collect();
            if i % HOT_EVERY == 0 {
                k[0] += 8.0;
            }
            k
        })
        .collect();
    let values = (0..tokens)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    Ok(KvHead::new(keys, values, Some(vec![query]))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "latent_transfer=debug"
    } else {
        "latent_transfer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("latent-transfer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    anyhow::ensure!(cli.tokens > 0 && cli.dim > 0, "--tokens and --dim must be positive");
    info!(
        tokens = cli.tokens,
        dim = cli.dim,
        threshold = config.compression.attention_threshold,
        workers = config.workers.effective_threads(),
        "Configuration loaded"
    );

    let mut rng = StdRng::seed_from_u64(config.alignment.seed.unwrap_or(42));
    let pool = WorkerPool::new(&config.workers)?;

    // Compression.
    let estimate = CompressionMetrics::estimate(
        adapter_for(&cli.model),
        cli.tokens,
        cli.dim,
        Some(config.compression.attention_threshold),
    )?;
    info!(
        model = %cli.model,
        retained = estimate.selected_tokens,
        saved_percent = estimate.bandwidth_savings_percent,
        "Estimated savings"
    );
    let heads = (0..HEADS)
        .map(|_| synthetic_head(&mut rng, cli.tokens, cli.dim))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let cache = KvCache::new(vec![heads])?;
    let compression = config.compression.fit_to_length(cli.tokens);
    let compressor = AttentionCompressor::new(compression.clone());
    let compressed = pool.compress_cache(&compressor, &cache)?;

    let first = &compressed.layers[0][0];
    let metrics = CompressionMetrics::from_head(first);
    let quality = validate_quality(first, &compression);
    info!(
        retained = metrics.selected_tokens,
        total = metrics.total_tokens,
        ratio = metrics.compression_ratio,
        saved_bytes = metrics.bandwidth_savings_bytes,
        saved_percent = metrics.bandwidth_savings_percent,
        attention = metrics.cumulative_attention,
        "Compressed cache"
    );
    if !quality.passed {
        warn!(warnings = ?quality.warnings, "Compression quality below threshold");
    }
    for rec in &quality.recommendations {
        info!(recommendation = %rec, "Compression quality");
    }

    let artifact = compressed.serialize(&EncodeOptions::default())?;
    let restored = CompressedCache::deserialize(&artifact).context("re-reading cache artifact")?;
    let full = decompress_cache(&restored)?;
    info!(
        artifact_bytes = artifact.len(),
        raw_bytes = HEADS * cli.tokens * cli.dim * 2 * 4,
        restored_len = full[0][0].keys.len(),
        "Cache artifact round-tripped"
    );

    // Alignment.
    let target_dim = cli.dim + cli.dim / 2;
    let matrix = WMatrix::build(
        cli.dim,
        target_dim,
        "synthetic-src",
        "synthetic-tgt",
        &config.alignment,
    )?;
    let aligned = pool.align_batch(&matrix, &first.keys)?;
    let mean_confidence =
        aligned.iter().map(|r| r.confidence).sum::<f64>() / aligned.len().max(1) as f64;
    info!(
        vectors = aligned.len(),
        target_dim,
        mean_confidence,
        "Aligned retained keys"
    );

    // Verification.
    let verifier = IntegrityVerifier::new(config.verifier.clone())?;
    let sweeper = verifier.spawn_sweeper();
    let challenge = verifier.generate_challenge()?;
    let vectors = challenge
        .prompts
        .iter()
        .map(|_| {
            let input: Vec<f32> = (0..cli.dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            matrix.forward(&input)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let response = ChallengeResponse::new(&challenge, vectors);
    let verdict = verifier.verify(&response, &challenge)?;
    info!(
        passed = verdict.passed,
        fidelity = verdict.fidelity_score,
        pattern_matches = verdict.pattern_matches,
        anomalies = ?verdict.anomaly_names(),
        confidence = verdict.confidence,
        "Verified challenge response"
    );
    sweeper.abort();

    // Calibration.
    let embedder = HashingEmbedder::new(config.calibration.embedding_dim)?;
    let anchors = catalogue::init_global(&embedder)?;
    let calibrator = Calibrator::new(anchors, config.calibration.clone())?;
    let queries = challenge
        .prompts
        .iter()
        .map(|p| embedder.embed(&p.text))
        .collect::<Result<Vec<_>, _>>()?;
    for (prompt, report) in challenge
        .prompts
        .iter()
        .zip(pool.calibrate_batch(&calibrator, &queries)?)
    {
        info!(
            category = %prompt.category,
            score = report.calibration_score,
            coverage = report.coverage,
            nearest = report.nearest.first().map(|m| m.prompt.as_str()).unwrap_or(""),
            recommendations = report.recommendations.len(),
            "Calibrated prompt"
        );
    }

    Ok(())
}
