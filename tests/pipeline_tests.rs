//! End-to-end: compress a long cache, align what survives, verify and calibrate.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use latent_transfer::alignment::WMatrix;
use latent_transfer::anchor::{AnchorCatalogue, Calibrator, HashingEmbedder};
use latent_transfer::cache::compressor::{decompress, AttentionCompressor};
use latent_transfer::cache::kv::{CompressedCache, KvCache, KvHead};
use latent_transfer::codec::EncodeOptions;
use latent_transfer::config::{AlignmentConfig, CalibrationConfig, Config, WorkerConfig};
use latent_transfer::pool::WorkerPool;
use latent_transfer::verifier::{ChallengeResponse, IntegrityVerifier};

const TOKENS: usize = 2048;
const DIM: usize = 64;

/// Every 20th token carries the query direction; the rest is small noise.
fn long_head(seed: u64) -> KvHead {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys = (0..TOKENS)
        .map(|i| {
            let mut k: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-0.1..0.1)).collect();
            if i % 20 == 0 {
                k[0] += 8.0;
            }
            k
        })
        .collect();
    let values = (0..TOKENS)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let mut query = vec![0.0; DIM];
    query[0] = 8.0;
    KvHead::new(keys, values, Some(vec![query])).unwrap()
}

#[test]
fn test_2048_token_cache_compresses_to_a_small_fraction() {
    let config = Config::default();
    assert_eq!(config.compression.max_tokens, TOKENS);
    let head = long_head(2048);
    let compressed = AttentionCompressor::new(config.compression.clone())
        .compress(&head)
        .unwrap();

    assert!(compressed.attention_mass >= 0.90, "{}", compressed.attention_mass);
    assert!(compressed.retained() >= config.compression.min_tokens);
    assert!(
        compressed.retained() < TOKENS / 10,
        "retained {}",
        compressed.retained()
    );
    assert!(compressed.compression_ratio() < 0.1);
    assert!(compressed.retained_indices.iter().all(|i| i % 20 == 0));

    let restored = decompress(&compressed, TOKENS).unwrap();
    assert_eq!(restored.keys.len(), TOKENS);
    assert_eq!(restored.keys[20], head.keys[20]);
}

#[test]
fn test_full_pipeline() {
    let config = Config::default();
    let pool = WorkerPool::new(&WorkerConfig { num_threads: 4 }).unwrap();

    // Compress.
    let cache = KvCache::new(vec![(0..4).map(long_head).collect()]).unwrap();
    let compressor = AttentionCompressor::new(config.compression.clone());
    let compressed = pool.compress_cache(&compressor, &cache).unwrap();
    assert!(compressed.attention_mass() >= 0.90);
    let blob = compressed.serialize(&EncodeOptions::default()).unwrap();
    let compressed = CompressedCache::deserialize(&blob).unwrap();

    // Align the retained values into a wider space.
    let matrix = WMatrix::build(
        DIM,
        96,
        "model-a",
        "model-b",
        &AlignmentConfig {
            seed: Some(11),
            ..Default::default()
        },
    )
    .unwrap();
    let aligned = pool
        .align_batch(&matrix, &compressed.layers[0][0].values)
        .unwrap();
    assert_eq!(aligned.len(), compressed.layers[0][0].retained());
    assert!(aligned
        .iter()
        .all(|r| r.output.len() == 96 && (0.0..=1.0).contains(&r.confidence)));

    // Verify a source that answers with aligned vectors.
    let verifier = IntegrityVerifier::new(config.verifier.clone()).unwrap();
    let challenge = verifier.generate_challenge().unwrap();
    let vectors = aligned
        .iter()
        .take(challenge.len())
        .map(|r| r.output.clone())
        .collect();
    let verdict = verifier
        .verify(&ChallengeResponse::new(&challenge, vectors), &challenge)
        .unwrap();
    assert!((0.0..=1.0).contains(&verdict.fidelity_score));
    assert!(verifier.registry().is_empty());

    // Calibrate in the anchor space.
    let embedder = HashingEmbedder::new(DIM).unwrap();
    let calibrator = Calibrator::new(
        Arc::new(AnchorCatalogue::build(&embedder).unwrap()),
        CalibrationConfig {
            embedding_dim: DIM,
            ..Default::default()
        },
    )
    .unwrap();
    let reports = pool
        .calibrate_batch(&calibrator, &compressed.layers[0][0].keys)
        .unwrap();
    assert_eq!(reports.len(), compressed.layers[0][0].retained());
    assert!(reports
        .iter()
        .all(|r| r.nearest.len() == 10 && r.coverage > 0.0));
}
