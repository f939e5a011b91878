//! Dense vector helpers shared by every component.
//!
//! Accumulation is done in f64 so long vectors do not drift.

/// Dot product over the common prefix of `a` and `b`.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

/// Euclidean (L2) norm.
pub fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// Cosine similarity clamped to [-1, 1]. Zero vectors have similarity 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom < 1e-12 {
        return 0.0;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0)
}

/// Euclidean distance.
pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

pub fn mean(a: &[f32]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().map(|&x| x as f64).sum::<f64>() / a.len() as f64
}

/// Population variance across the components of one vector.
pub fn variance(a: &[f32]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let m = mean(a);
    a.iter()
        .map(|&x| {
            let d = x as f64 - m;
            d * d
        })
        .sum::<f64>()
        / a.len() as f64
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let uniform = 1.0 / logits.len().max(1) as f64;
        return vec![uniform; logits.len()];
    }
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Component-wise mean of a set of equal-length vectors.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut acc = vec![0.0f64; first.len()];
    for v in vectors {
        for (a, &x) in acc.iter_mut().zip(v.iter()) {
            *a += x as f64;
        }
    }
    let n = vectors.len() as f64;
    acc.into_iter().map(|a| (a / n) as f32).collect()
}

/// Unit-length copy of `a`, or `None` for a (near-)zero vector.
pub fn normalized(a: &[f32]) -> Option<Vec<f32>> {
    let n = norm(a);
    if n < 1e-12 {
        return None;
    }
    Some(a.iter().map(|&x| (x as f64 / n) as f32).collect())
}

pub fn all_finite(a: &[f32]) -> bool {
    a.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_and_distance() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-12);
        assert!(cosine(&a, &b).abs() < 1e-12);
        assert!((euclidean(&a, &b) - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(cosine(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(probs[3] > 0.99);
    }

    #[test]
    fn test_variance_of_constant_is_zero() {
        assert_eq!(variance(&[0.5; 16]), 0.0);
        assert!(variance(&[1.0, -1.0]) > 0.9);
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&[vec![1.0, 3.0], vec![3.0, 5.0]]);
        assert_eq!(c, vec![2.0, 4.0]);
    }
}
