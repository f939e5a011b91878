//! Integration tests for anchor calibration.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use latent_transfer::anchor::catalogue::{self, CATALOGUE_SIZE, CORE_ANCHORS};
use latent_transfer::anchor::{
    AnchorCatalogue, AnchorCategory, Calibrator, EmbeddingProvider, HashingEmbedder,
};
use latent_transfer::config::CalibrationConfig;
use latent_transfer::{EngineError, Result};

const DIM: usize = 96;

fn calibrator() -> Calibrator {
    let catalogue = AnchorCatalogue::build(&HashingEmbedder::new(DIM).unwrap()).unwrap();
    Calibrator::new(
        Arc::new(catalogue),
        CalibrationConfig {
            embedding_dim: DIM,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_nearest_is_monotonic() {
    let c = calibrator();
    let mut rng = StdRng::seed_from_u64(8);
    for _ in 0..10 {
        let query: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let nearest = c.find_nearest(&query, 25).unwrap();
        assert_eq!(nearest.len(), 25);
        assert!(nearest[0].similarity <= 1.0);
        assert!(nearest
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
        assert!(nearest.iter().all(|m| m.similarity <= nearest[0].similarity));
    }
}

#[test]
fn test_nearest_is_deterministic() {
    let c = calibrator();
    let query = HashingEmbedder::new(DIM)
        .unwrap()
        .embed("Why does ice float on water?")
        .unwrap();
    let a = c.find_nearest(&query, 10).unwrap();
    let b = c.find_nearest(&query, 10).unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].category, AnchorCategory::CausalReasoning);
    assert!(a[0].weight == 1.0);
}

#[test]
fn test_core_prompt_calibrates_well() {
    let c = calibrator();
    let query = HashingEmbedder::new(DIM)
        .unwrap()
        .embed("Explain photosynthesis in simple terms.")
        .unwrap();
    let result = c.calibrate(&query).unwrap();
    assert_eq!(result.nearest.len(), 10);
    assert!((result.nearest[0].similarity - 1.0).abs() < 1e-6);
    assert!(result.calibration_score > 0.0 && result.calibration_score <= 1.0);
    assert!(result.coverage >= 1.0 / 16.0);
}

#[test]
fn test_narrow_vector_gets_recommendations() {
    let c = calibrator();
    let result = c.calibrate(&vec![0.0; DIM]).unwrap();
    assert_eq!(result.coverage, 1.0 / 16.0);
    assert!(result
        .recommendations
        .iter()
        .any(|r| r == "recommend broadening creative expression category"));
}

#[test]
fn test_non_finite_vector_rejected() {
    let c = calibrator();
    let mut query = vec![0.5; DIM];
    query[0] = f32::NAN;
    assert!(matches!(
        c.calibrate(&query),
        Err(EngineError::NonFinite { .. })
    ));
    query[0] = f32::INFINITY;
    assert!(matches!(
        c.find_nearest(&query, 5),
        Err(EngineError::NonFinite { .. })
    ));
}

#[test]
fn test_embedding_dim_must_match_catalogue() {
    let catalogue = Arc::new(AnchorCatalogue::build(&HashingEmbedder::new(DIM).unwrap()).unwrap());
    let mismatched = CalibrationConfig {
        embedding_dim: DIM * 2,
        ..Default::default()
    };
    assert!(matches!(
        Calibrator::new(catalogue, mismatched),
        Err(EngineError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_catalogue_weights() {
    let c = calibrator();
    for category in AnchorCategory::ALL {
        let weights: Vec<f64> = c
            .catalogue()
            .in_category(category)
            .map(|r| r.weight)
            .collect();
        assert!(weights[..CORE_ANCHORS].iter().all(|&w| w == 1.0));
        assert!(weights[CORE_ANCHORS - 1..].windows(2).all(|w| w[0] > w[1]));
    }
}

struct Failing;

impl EmbeddingProvider for Failing {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EngineError::EmptyInput {
            what: "backend offline".to_string(),
        })
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn name(&self) -> &str {
        "failing"
    }
}

struct Short;

impl EmbeddingProvider for Short {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; 4])
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn name(&self) -> &str {
        "short"
    }
}

#[test]
fn test_provider_errors_surface() {
    assert!(AnchorCatalogue::build(&Failing).is_err());
    assert!(matches!(
        AnchorCatalogue::build(&Short),
        Err(EngineError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_global_catalogue_shared_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(|| catalogue::global().unwrap()))
        .collect();
    let catalogues: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for c in &catalogues {
        assert!(Arc::ptr_eq(c, &catalogues[0]));
        assert_eq!(c.len(), CATALOGUE_SIZE);
    }
}
