//! Singular-value spectra and the information-retention score.
//!
//! Retention compares the normalized singular-value spectrum of a batch of
//! source vectors with that of their aligned images: `exp(-KL(source || aligned))`.
//! A transform that only rotates or uniformly scales the batch keeps the
//! spectrum shape and scores 1; one that collapses directions scores lower.

use crate::error::{EngineError, Result};

/// Upper bound on Jacobi sweeps; convergence is quadratic, so this is rarely reached.
const JACOBI_SWEEPS: usize = 64;
/// Smoothing term inside the KL logarithm.
const KL_EPSILON: f64 = 1e-10;

/// Eigenvalues of the symmetric `n x n` row-major matrix `a` (cyclic Jacobi).
fn symmetric_eigenvalues(mut a: Vec<f64>, n: usize) -> Vec<f64> {
    let scale: f64 = a.iter().map(|x| x * x).sum();
    for _ in 0..JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| i * n + j))
            .map(|k| a[k] * a[k])
            .sum();
        if off <= 1e-24 * scale.max(f64::MIN_POSITIVE) {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[k * n + p], a[k * n + q]);
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p * n + k], a[q * n + k]);
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
            }
        }
    }
    (0..n).map(|i| a[i * n + i]).collect()
}

/// Singular values of the matrix whose rows are `rows`, in descending order.
///
/// Works on the smaller of the two Gram matrices, so the result has
/// `min(rows, dim)` entries.
pub fn singular_values(rows: &[Vec<f32>]) -> Result<Vec<f64>> {
    let n = rows.len();
    let dim = rows.first().map(Vec::len).unwrap_or(0);
    if n == 0 || dim == 0 {
        return Err(EngineError::empty("no vectors for singular values"));
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(EngineError::dimension(format!("row {i}"), dim, row.len()));
        }
        EngineError::check_finite(format!("row {i}"), row)?;
    }

    let (size, gram) = if n <= dim {
        let mut g = vec![0.0f64; n * n];
        for i in 0..n {
            for j in i..n {
                let v = crate::vector::dot(&rows[i], &rows[j]);
                g[i * n + j] = v;
                g[j * n + i] = v;
            }
        }
        (n, g)
    } else {
        let mut g = vec![0.0f64; dim * dim];
        for row in rows {
            for i in 0..dim {
                let ri = row[i] as f64;
                for j in i..dim {
                    g[i * dim + j] += ri * row[j] as f64;
                }
            }
        }
        for i in 0..dim {
            for j in 0..i {
                g[i * dim + j] = g[j * dim + i];
            }
        }
        (dim, g)
    };

    let mut values: Vec<f64> = symmetric_eigenvalues(gram, size)
        .into_iter()
        .map(|e| e.max(0.0).sqrt())
        .collect();
    values.sort_by(|a, b| b.total_cmp(a));
    Ok(values)
}

/// `exp(-KL)` between the normalized spectra of `source` and `aligned`, in [0, 1].
///
/// Spectra of different lengths are compared rank by rank, with the shorter
/// one padded by zeros. Directions a transform drops therefore count as loss.
pub fn information_retention(source: &[Vec<f32>], aligned: &[Vec<f32>]) -> Result<f64> {
    if source.len() != aligned.len() {
        return Err(EngineError::dimension(
            "aligned batch size",
            source.len(),
            aligned.len(),
        ));
    }
    let mut p = singular_values(source)?;
    let mut q = singular_values(aligned)?;
    let (p_sum, q_sum) = (p.iter().sum::<f64>(), q.iter().sum::<f64>());
    if p_sum <= 0.0 || q_sum <= 0.0 {
        return Ok(if p_sum == q_sum { 1.0 } else { 0.0 });
    }
    let len = p.len().max(q.len());
    p.resize(len, 0.0);
    q.resize(len, 0.0);

    let kl: f64 = p
        .iter()
        .zip(&q)
        .map(|(&ps, &qs)| {
            let (pn, qn) = (ps / p_sum, qs / q_sum);
            pn * ((pn + KL_EPSILON) / (qn + KL_EPSILON)).ln()
        })
        .sum();
    Ok((-kl).exp().clamp(0.0, 1.0))
}
