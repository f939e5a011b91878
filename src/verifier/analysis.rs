//! Statistical signals over a batch of response vectors.
//!
//! Three independent signals, each in [0, 1]:
//! - pattern: per-vector sanity checks tuned to the prompt category
//! - distribution: degenerate or out-of-envelope spread
//! - consistency: distinct prompts that produced near-copies

use serde::{Deserialize, Serialize};

use crate::vector;
use crate::verifier::challenge::PromptCategory;

/// Component magnitude (on the unit vector) treated as zero.
const NEAR_ZERO: f64 = 1e-6;
/// std / rms below which a vector counts as constant.
const UNIFORM_RATIO: f64 = 1e-4;
/// Across-batch spread / rms below which the response is one vector repeated.
const BATCH_UNIFORM_RATIO: f64 = 1e-3;
/// Allowed factor between a vector's spread and the batch median spread.
const SHIFT_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    UniformDistribution,
    DistributionShift,
    CrossPromptInconsistency,
    NonFiniteValues,
    SignatureMismatch,
}

impl AnomalyKind {
    pub fn name(self) -> &'static str {
        match self {
            AnomalyKind::UniformDistribution => "uniform-distribution",
            AnomalyKind::DistributionShift => "distribution-shift",
            AnomalyKind::CrossPromptInconsistency => "cross-prompt-inconsistency",
            AnomalyKind::NonFiniteValues => "non-finite-values",
            AnomalyKind::SignatureMismatch => "signature-mismatch",
        }
    }

    /// Contribution of one occurrence to the anomaly ratio.
    pub fn severity(self) -> f64 {
        match self {
            AnomalyKind::DistributionShift => 0.5,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One detected anomaly; `indices` are positions in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub indices: Vec<usize>,
    pub severity: f64,
    pub detail: String,
}

impl Anomaly {
    pub(crate) fn new(kind: AnomalyKind, indices: Vec<usize>, detail: String) -> Self {
        Self {
            kind,
            indices,
            severity: kind.severity(),
            detail,
        }
    }
}

/// Output of [`analyze`].
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub pattern_matches: usize,
    pub pattern_score: f64,
    pub distribution_score: f64,
    pub consistency_score: f64,
    pub anomalies: Vec<Anomaly>,
}

fn is_uniform(v: &[f32]) -> bool {
    let rms = (vector::dot(v, v) / v.len().max(1) as f64).sqrt();
    rms < 1e-12 || vector::variance(v).sqrt() / rms < UNIFORM_RATIO
}

/// Spread across the batch, per dimension, relative to the batch rms.
/// `None` when fewer than two vectors are given or all of them are zero.
fn batch_spread_ratio(vectors: &[&[f32]]) -> Option<f64> {
    let count = vectors.len();
    if count < 2 {
        return None;
    }
    let dim = vectors[0].len();
    let mut variance_sum = 0.0;
    let mut square_sum = 0.0;
    for d in 0..dim {
        let mean = vectors.iter().map(|v| v[d] as f64).sum::<f64>() / count as f64;
        for v in vectors {
            let x = v[d] as f64;
            square_sum += x * x;
            variance_sum += (x - mean) * (x - mean) / count as f64;
        }
    }
    let rms = (square_sum / (count * dim).max(1) as f64).sqrt();
    if rms < 1e-12 {
        return None;
    }
    Some((variance_sum / dim.max(1) as f64).sqrt() / rms)
}

fn matches_pattern(v: &[f32], category: PromptCategory) -> bool {
    if !vector::all_finite(v) || is_uniform(v) {
        return false;
    }
    let Some(unit) = vector::normalized(v) else {
        return false;
    };
    let peak = unit.iter().map(|x| x.abs() as f64).fold(0.0, f64::max);
    let zeros = unit.iter().filter(|x| (x.abs() as f64) < NEAR_ZERO).count();
    peak <= category.peak_limit() && (zeros as f64 / unit.len() as f64) <= category.sparsity_limit()
}

fn median(mut xs: Vec<f64>) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.sort_by(|a, b| a.total_cmp(b));
    let mid = xs.len() / 2;
    if xs.len() % 2 == 0 {
        (xs[mid - 1] + xs[mid]) / 2.0
    } else {
        xs[mid]
    }
}

/// Score `vectors` (one per entry of `categories`) for poisoning signals.
///
/// Callers guarantee equal, non-zero lengths and a shared dimension.
pub fn analyze(vectors: &[Vec<f32>], categories: &[PromptCategory], similarity_ceiling: f64) -> Signals {
    let n = vectors.len().max(1) as f64;
    let mut anomalies = Vec::new();

    let pattern_matches = vectors
        .iter()
        .zip(categories)
        .filter(|(v, &cat)| matches_pattern(v, cat))
        .count();

    // Distribution.
    let mut flagged = vec![false; vectors.len()];
    let finite: Vec<bool> = vectors.iter().map(|v| vector::all_finite(v)).collect();
    for (i, v) in vectors.iter().enumerate() {
        if !finite[i] {
            flagged[i] = true;
            anomalies.push(Anomaly::new(
                AnomalyKind::NonFiniteValues,
                vec![i],
                format!("vector {i} contains NaN or infinite components"),
            ));
        } else if is_uniform(v) {
            flagged[i] = true;
            anomalies.push(Anomaly::new(
                AnomalyKind::UniformDistribution,
                vec![i],
                format!("vector {i} has near-zero variance across dimensions"),
            ));
        }
    }
    // Non-constant vectors can still all be the same vector.
    let unflagged: Vec<usize> = (0..vectors.len()).filter(|&i| !flagged[i]).collect();
    let columns: Vec<&[f32]> = unflagged.iter().map(|&i| vectors[i].as_slice()).collect();
    if let Some(ratio) = batch_spread_ratio(&columns) {
        if ratio < BATCH_UNIFORM_RATIO {
            for &i in &unflagged {
                flagged[i] = true;
                anomalies.push(Anomaly::new(
                    AnomalyKind::UniformDistribution,
                    vec![i],
                    format!("vector {i} repeats across the response (batch spread {ratio:.2e})"),
                ));
            }
        }
    }
    let spreads: Vec<f64> = vectors
        .iter()
        .map(|v| vector::variance(v).sqrt())
        .collect();
    let healthy: Vec<f64> = spreads
        .iter()
        .zip(&flagged)
        .filter(|(_, &f)| !f)
        .map(|(&s, _)| s)
        .collect();
    let typical = median(healthy);
    if typical > 0.0 {
        for (i, &s) in spreads.iter().enumerate() {
            if flagged[i] {
                continue;
            }
            let ratio = s / typical;
            if !(1.0 / SHIFT_FACTOR..=SHIFT_FACTOR).contains(&ratio) {
                flagged[i] = true;
                anomalies.push(Anomaly::new(
                    AnomalyKind::DistributionShift,
                    vec![i],
                    format!("vector {i} spread is {ratio:.2}x the batch median"),
                ));
            }
        }
    }
    let distribution_score = 1.0 - flagged.iter().filter(|&&f| f).count() as f64 / n;

    // Consistency.
    let mut copied = vec![false; vectors.len()];
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if !(finite[i] && finite[j]) {
                continue;
            }
            let cos = vector::cosine(&vectors[i], &vectors[j]);
            if cos > similarity_ceiling {
                copied[i] = true;
                copied[j] = true;
                anomalies.push(Anomaly::new(
                    AnomalyKind::CrossPromptInconsistency,
                    vec![i, j],
                    format!("vectors {i} and {j} have cosine similarity {cos:.4}"),
                ));
            }
        }
    }
    let consistency_score = 1.0 - copied.iter().filter(|&&c| c).count() as f64 / n;

    Signals {
        pattern_matches,
        pattern_score: pattern_matches as f64 / n,
        distribution_score,
        consistency_score,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn genuine(n: usize, dim: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(5);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn cats(n: usize) -> Vec<PromptCategory> {
        (0..n).map(|i| PromptCategory::ALL[i % 5]).collect()
    }

    #[test]
    fn test_genuine_batch_is_clean() {
        let s = analyze(&genuine(10, 64), &cats(10), 0.98);
        assert_eq!(s.pattern_matches, 10);
        assert_eq!(s.distribution_score, 1.0);
        assert_eq!(s.consistency_score, 1.0);
        assert!(s.anomalies.is_empty(), "{:?}", s.anomalies);
    }

    #[test]
    fn test_constant_vectors_flagged() {
        let vectors = vec![vec![0.5f32; 64]; 10];
        let s = analyze(&vectors, &cats(10), 0.98);
        assert_eq!(s.pattern_matches, 0);
        assert_eq!(s.distribution_score, 0.0);
        assert_eq!(s.consistency_score, 0.0);
        assert!(s
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::UniformDistribution));
    }

    #[test]
    fn test_repeated_vector_flagged_uniform() {
        let vectors = vec![genuine(1, 64).remove(0); 10];
        let s = analyze(&vectors, &cats(10), 0.98);
        let uniform: Vec<_> = s
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::UniformDistribution)
            .collect();
        assert_eq!(uniform.len(), 10);
        assert_eq!(s.distribution_score, 0.0);
        assert_eq!(s.consistency_score, 0.0);
    }

    #[test]
    fn test_batch_spread_ratio() {
        let v = genuine(3, 16);
        let rows: Vec<&[f32]> = v.iter().map(Vec::as_slice).collect();
        assert!(batch_spread_ratio(&rows).unwrap() > 0.1);
        assert_eq!(batch_spread_ratio(&rows[..1]), None);
        let same = [rows[0], rows[0], rows[0]];
        assert!(batch_spread_ratio(&same).unwrap() < 1e-9);
        let zeros = vec![0.0f32; 16];
        assert_eq!(batch_spread_ratio(&[zeros.as_slice(), zeros.as_slice()]), None);
    }

    #[test]
    fn test_one_hot_fails_pattern() {
        let mut vectors = genuine(5, 32);
        vectors[2] = {
            let mut v = vec![0.0; 32];
            v[7] = 3.0;
            v
        };
        let s = analyze(&vectors, &cats(5), 0.98);
        assert_eq!(s.pattern_matches, 4);
    }

    #[test]
    fn test_scaled_outlier_is_shift() {
        let mut vectors = genuine(6, 32);
        vectors[4].iter_mut().for_each(|x| *x *= 100.0);
        let s = analyze(&vectors, &cats(6), 0.98);
        let shifted: Vec<_> = s
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::DistributionShift)
            .collect();
        assert_eq!(shifted.len(), 1);
        assert_eq!(shifted[0].indices, vec![4]);
    }

    #[test]
    fn test_duplicate_pair_flagged() {
        let mut vectors = genuine(5, 32);
        vectors[3] = vectors[1].clone();
        let s = analyze(&vectors, &cats(5), 0.98);
        assert!((s.consistency_score - 0.6).abs() < 1e-12);
        assert_eq!(s.anomalies.len(), 1);
        assert_eq!(s.anomalies[0].indices, vec![1, 3]);
    }

    #[test]
    fn test_nan_flagged() {
        let mut vectors = genuine(4, 16);
        vectors[0][3] = f32::NAN;
        let s = analyze(&vectors, &cats(4), 0.98);
        assert!(s
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::NonFiniteValues && a.indices == vec![0]));
    }
}
