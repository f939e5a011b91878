//! Integration tests for KV cache compression.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use latent_transfer::cache::adapter::{adapter_for, AttentionType};
use latent_transfer::cache::compressor::{decompress, decompress_cache, AttentionCompressor};
use latent_transfer::cache::kv::{CompressedCache, KvCache, KvHead};
use latent_transfer::cache::quality::{validate_quality, CompressionMetrics};
use latent_transfer::codec::{EncodeOptions, ValueFormat};
use latent_transfer::config::CompressionConfig;
use latent_transfer::EngineError;

fn random_head(rng: &mut StdRng, tokens: usize, dim: usize, with_queries: bool) -> KvHead {
    let mut draw = |n: usize| -> Vec<Vec<f32>> {
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    };
    let keys = draw(tokens);
    let values = draw(tokens);
    let queries = with_queries.then(|| draw(3));
    KvHead::new(keys, values, queries).unwrap()
}

fn config(threshold: f64, min: usize, max: usize) -> CompressionConfig {
    CompressionConfig {
        attention_threshold: threshold,
        min_tokens: min,
        max_tokens: max,
        window_size: None,
    }
}

#[test]
fn test_roundtrip_shape() {
    let mut rng = StdRng::seed_from_u64(1);
    for (tokens, cfg) in [
        (50, config(0.5, 4, 50)),
        (64, config(0.9, 1, 20)),
        (30, config(1.0, 30, 30)),
    ] {
        let head = random_head(&mut rng, tokens, 8, true);
        let compressor = AttentionCompressor::new(cfg);
        let compressed = compressor.compress(&head).unwrap();
        let restored = decompress(&compressed, tokens).unwrap();

        assert_eq!(restored.keys.len(), tokens);
        assert_eq!(restored.values.len(), tokens);
        for i in 0..tokens {
            if compressed.retained_indices.contains(&i) {
                assert_eq!(restored.keys[i], head.keys[i]);
                assert_eq!(restored.values[i], head.values[i]);
            } else {
                assert_eq!(restored.keys[i], vec![0.0; 8]);
                assert_eq!(restored.values[i], vec![0.0; 8]);
            }
        }
    }
}

#[test]
fn test_bounds_and_ordering() {
    let mut rng = StdRng::seed_from_u64(2);
    for trial in 0..20 {
        let tokens = rng.gen_range(10..120);
        let min = rng.gen_range(1..=tokens / 2);
        let max = rng.gen_range(min..=tokens);
        let threshold = rng.gen_range(0.05..=1.0);
        let head = random_head(&mut rng, tokens, 6, trial % 2 == 0);
        let compressed = AttentionCompressor::new(config(threshold, min, max))
            .compress(&head)
            .unwrap();

        let retained = compressed.retained();
        assert!(min <= retained && retained <= max.min(tokens), "trial {trial}");
        assert!(compressed.retained_indices.windows(2).all(|w| w[0] < w[1]));
        if retained < max {
            assert!(compressed.attention_mass >= threshold - 1e-9, "trial {trial}");
        }
    }
}

#[test]
fn test_invalid_configs_fail_before_work() {
    let mut rng = StdRng::seed_from_u64(3);
    let head = random_head(&mut rng, 20, 4, false);
    for cfg in [
        config(0.9, 8, 4),
        config(0.9, 1, 21),
        config(0.0, 1, 10),
        config(1.5, 1, 10),
        config(0.9, 0, 10),
    ] {
        assert!(
            matches!(
                AttentionCompressor::new(cfg.clone()).compress(&head),
                Err(EngineError::InvalidConfig { .. })
            ),
            "{cfg:?}"
        );
    }
}

#[test]
fn test_empty_and_ragged_heads_rejected() {
    assert!(matches!(
        KvHead::new(Vec::new(), Vec::new(), None),
        Err(EngineError::EmptyInput { .. })
    ));
    assert!(matches!(
        KvHead::new(vec![vec![1.0; 4]; 3], vec![vec![1.0; 4]; 2], None),
        Err(EngineError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        KvHead::new(vec![vec![1.0; 4], vec![1.0; 3]], vec![vec![1.0; 4]; 2], None),
        Err(EngineError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_non_finite_head_is_an_error_not_a_score() {
    let mut rng = StdRng::seed_from_u64(40);
    let mut head = random_head(&mut rng, 32, 8, true);
    head.keys[5][3] = f32::NAN;
    let compressor = AttentionCompressor::new(config(0.9, 2, 32));
    assert!(matches!(
        compressor.compress(&head),
        Err(EngineError::NonFinite { .. })
    ));

    let mut head = random_head(&mut rng, 32, 8, false);
    head.values[0][0] = f32::INFINITY;
    assert!(matches!(
        compressor.compress(&head),
        Err(EngineError::NonFinite { .. })
    ));
    assert!(matches!(
        KvHead::new(head.keys.clone(), head.values.clone(), None),
        Err(EngineError::NonFinite { .. })
    ));
}

#[test]
fn test_input_untouched() {
    let mut rng = StdRng::seed_from_u64(4);
    let head = random_head(&mut rng, 40, 4, true);
    let before = head.clone();
    AttentionCompressor::new(config(0.8, 2, 40))
        .compress(&head)
        .unwrap();
    assert_eq!(head, before);
}

#[test]
fn test_cache_artifact_roundtrip_and_decompress() {
    let mut rng = StdRng::seed_from_u64(5);
    let layers = (0..2)
        .map(|_| (0..3).map(|_| random_head(&mut rng, 32, 8, true)).collect())
        .collect();
    let cache = KvCache::new(layers).unwrap();
    let compressed = AttentionCompressor::new(config(0.7, 2, 32))
        .compress_cache(&cache)
        .unwrap();
    assert_eq!(compressed.heads().count(), 6);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.ltaf");
    std::fs::write(&path, compressed.serialize(&EncodeOptions::default()).unwrap()).unwrap();
    let restored = CompressedCache::deserialize(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(restored, compressed);

    let full = decompress_cache(&restored).unwrap();
    assert_eq!(full.len(), 2);
    assert!(full.iter().flatten().all(|h| h.keys.len() == 32));

    let half = compressed
        .serialize(&EncodeOptions {
            format: ValueFormat::F16,
            zstd_level: Some(3),
        })
        .unwrap();
    let restored = CompressedCache::deserialize(&half).unwrap();
    assert_eq!(
        restored.layers[1][2].retained_indices,
        compressed.layers[1][2].retained_indices
    );
}

#[test]
fn test_mismatched_cache_rejected() {
    let mut rng = StdRng::seed_from_u64(6);
    let a = random_head(&mut rng, 16, 4, false);
    let b = random_head(&mut rng, 17, 4, false);
    assert!(KvCache::new(vec![vec![a, b]]).is_err());
}

#[test]
fn test_sliding_window_adapter() {
    let adapter = adapter_for("Mistral-7B-Instruct");
    assert_eq!(adapter.attention_type, AttentionType::SlidingWindow);

    let mut rng = StdRng::seed_from_u64(7);
    let head = random_head(&mut rng, 64, 4, true);
    let cfg = CompressionConfig {
        window_size: Some(16),
        ..config(0.9, 1, 64)
    };
    let compressed = AttentionCompressor::new(cfg).compress(&head).unwrap();
    assert!(compressed.retained_indices.iter().all(|&i| i >= 48));
}

#[test]
fn test_metrics_and_quality() {
    let mut rng = StdRng::seed_from_u64(8);
    let head = random_head(&mut rng, 100, 16, true);
    let cfg = config(0.9, 5, 10);
    let compressed = AttentionCompressor::new(cfg.clone()).compress(&head).unwrap();

    let metrics = CompressionMetrics::from_head(&compressed);
    assert_eq!(metrics.total_tokens, 100);
    assert_eq!(metrics.selected_tokens, compressed.retained());
    assert_eq!(
        metrics.bandwidth_savings_bytes,
        (100 - compressed.retained()) * 2 * 16 * 4
    );

    // Random keys spread attention, so ten tokens cannot reach 90%.
    let report = validate_quality(&compressed, &cfg);
    assert!(!report.passed);
    assert!(!report.warnings.is_empty());
    assert!((report.information_loss - (1.0 - report.attention_coverage)).abs() < 1e-9);
}

#[test]
fn test_estimate_matches_adapter_profile() {
    for model in ["gpt-4", "claude-3-opus", "llama-3-70b", "mixtral-8x7b"] {
        let adapter = adapter_for(model);
        let estimate = CompressionMetrics::estimate(adapter, 2048, 128, None).unwrap();
        assert!(estimate.cumulative_attention >= adapter.recommended_threshold);
        assert!(estimate.selected_tokens >= 1 && estimate.selected_tokens < 2048);
        assert!(estimate.bandwidth_savings_percent > 90.0, "{model}: {estimate:?}");
    }
    let gpt4 = adapter_for("gpt-4");
    let strict = CompressionMetrics::estimate(gpt4, 2048, 128, Some(0.99)).unwrap();
    let loose = CompressionMetrics::estimate(gpt4, 2048, 128, Some(0.8)).unwrap();
    assert!(strict.selected_tokens > loose.selected_tokens);
}
