//! Hypothesis tests used by the drift and significance gates
//!
//! - Two-sample Kolmogorov-Smirnov test (distribution equality)
//! - Paired two-sided t-test (mean difference of matched samples)

use crate::descriptive::{mean, sample_std};
use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Largest `n1 * n2` for which the KS p-value is computed exactly.
/// Beyond this the asymptotic Kolmogorov distribution is used.
const KS_EXACT_MAX_CELLS: usize = 1_000_000;

/// Test statistic together with its two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Value of the test statistic
    pub statistic: f64,
    /// Two-sided p-value in `[0, 1]`
    pub p_value: f64,
}

/// Two-sample Kolmogorov-Smirnov test
///
/// Returns the supremum distance `D` between the two empirical CDFs and the
/// two-sided p-value of the null hypothesis that both samples come from the
/// same continuous distribution.
///
/// # Examples
///
/// ```
/// use gate_math::ks_two_sample;
///
/// let past = vec![0.0; 26];
/// let recent = vec![5.0; 14];
/// let outcome = ks_two_sample(&past, &recent).unwrap();
/// assert_eq!(outcome.statistic, 1.0);
/// assert!(outcome.p_value < 0.05);
/// ```
pub fn ks_two_sample(sample_a: &[f64], sample_b: &[f64]) -> Result<TestOutcome> {
    if sample_a.is_empty() || sample_b.is_empty() {
        return Err(MathError::InsufficientData(
            "KS test needs two non-empty samples".to_string(),
        ));
    }
    if sample_a.iter().chain(sample_b).any(|v| !v.is_finite()) {
        return Err(MathError::InvalidInput(
            "KS test samples must be finite".to_string(),
        ));
    }

    let mut a = sample_a.to_vec();
    let mut b = sample_b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n_a, n_b) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d_max: f64 = 0.0;

    // Step both CDFs past every copy of the next smallest value so ties
    // never produce a spurious gap.
    while i < n_a && j < n_b {
        let v = a[i].min(b[j]);
        while i < n_a && a[i] <= v {
            i += 1;
        }
        while j < n_b && b[j] <= v {
            j += 1;
        }
        let gap = (i as f64 / n_a as f64 - j as f64 / n_b as f64).abs();
        d_max = d_max.max(gap);
    }

    let p_value = if n_a.saturating_mul(n_b) <= KS_EXACT_MAX_CELLS {
        ks_exact_p_value(n_a, n_b, d_max)
    } else {
        let en = ((n_a * n_b) as f64 / (n_a + n_b) as f64).sqrt();
        kolmogorov_sf(en * d_max)
    };

    Ok(TestOutcome {
        statistic: d_max,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Exact two-sided p-value by walking the lattice of merged orderings.
///
/// Every interleaving of the two sorted samples is a monotone path from
/// `(0, 0)` to `(m, n)`; under the null all paths are equally likely. The
/// p-value is the probability mass of paths that leave the band
/// `|i/m - j/n| < d`, summed at the first exit so tiny tails keep their
/// precision.
fn ks_exact_p_value(m: usize, n: usize, d: f64) -> f64 {
    // D is a multiple of 1/(m*n), so compare in integer lattice units.
    let threshold = (d * (m * n) as f64).round() as i64;
    if threshold <= 0 {
        return 1.0;
    }
    let inside = |i: usize, j: usize| ((i * n) as i64 - (j * m) as i64).abs() < threshold;

    let mut current = vec![0.0_f64; n + 1];
    current[0] = 1.0;
    let mut escaped = 0.0_f64;

    for i in 0..=m {
        for j in 0..=n {
            if j > 0 {
                let remaining = (m - i + n - (j - 1)) as f64;
                current[j] += current[j - 1] * (n - (j - 1)) as f64 / remaining;
            }
            if !inside(i, j) {
                escaped += current[j];
                current[j] = 0.0;
            }
        }
        if i == m {
            break;
        }

        let mut next = vec![0.0_f64; n + 1];
        for (j, mass) in current.iter().enumerate() {
            let remaining = (m - i + n - j) as f64;
            next[j] = mass * (m - i) as f64 / remaining;
        }
        current = next;
    }

    escaped
}

/// Survival function of the limiting Kolmogorov distribution
fn kolmogorov_sf(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }

    if x < 1.18 {
        // Jacobi theta form converges quickly for small arguments
        let pi_sq = std::f64::consts::PI.powi(2);
        let cdf: f64 = (1..=20)
            .map(|k| {
                let odd = (2 * k - 1) as f64;
                (-(odd * odd) * pi_sq / (8.0 * x * x)).exp()
            })
            .sum::<f64>()
            * (2.0 * std::f64::consts::PI).sqrt()
            / x;
        return 1.0 - cdf;
    }

    let mut total = 0.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = (-2.0 * kf * kf * x * x).exp();
        total += if k % 2 == 1 { term } else { -term };
        if term < 1e-16 {
            break;
        }
    }

    2.0 * total
}

/// Paired two-sided Student t-test on matched samples
///
/// Tests whether the mean of `a[i] - b[i]` differs from zero.
///
/// # Examples
///
/// ```
/// use gate_math::paired_t_test;
///
/// let outcome = paired_t_test(&[0.0, 2.0, 2.0], &[1.0, 1.0, 0.0]).unwrap();
/// assert!((outcome.statistic - 0.756).abs() < 1e-3);
/// assert!((outcome.p_value - 0.529).abs() < 1e-3);
/// ```
pub fn paired_t_test(a: &[f64], b: &[f64]) -> Result<TestOutcome> {
    if a.len() != b.len() {
        return Err(MathError::InvalidInput(format!(
            "Paired samples must have equal length ({} vs {})",
            a.len(),
            b.len()
        )));
    }

    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let mean_diff = mean(&diffs)?;
    let sd = sample_std(&diffs)?;

    if sd == 0.0 || !sd.is_finite() {
        return Err(MathError::CalculationError(
            "Paired differences have zero variance; t statistic is undefined".to_string(),
        ));
    }

    let n = diffs.len() as f64;
    let statistic = mean_diff / (sd / n.sqrt());

    let dist = StudentsT::new(0.0, 1.0, n - 1.0)
        .map_err(|e| MathError::CalculationError(e.to_string()))?;
    let p_value = 2.0 * (1.0 - dist.cdf(statistic.abs()));

    Ok(TestOutcome {
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ks_identical_samples() {
        let a: Vec<f64> = (1..=50).map(f64::from).collect();
        let outcome = ks_two_sample(&a, &a).unwrap();

        assert_eq!(outcome.statistic, 0.0);
        assert_eq!(outcome.p_value, 1.0);
    }

    #[test]
    fn test_ks_fully_separated_samples() {
        let past = vec![0.0; 26];
        let recent = vec![5.0; 14];
        let outcome = ks_two_sample(&past, &recent).unwrap();

        assert_eq!(outcome.statistic, 1.0);
        // Only the two extreme interleavings reach D = 1
        let total_paths = 23_206_929_840.0_f64; // C(40, 14)
        assert_relative_eq!(outcome.p_value, 2.0 / total_paths, max_relative = 1e-4);
    }

    #[test]
    fn test_ks_small_exact_value() {
        // Only the 8 interleavings built from AB/BA pairs keep D below 2/3,
        // so P(D >= 2/3) = 12/20.
        let outcome = ks_two_sample(&[1.0, 2.0, 3.0], &[2.5, 4.0, 5.0]).unwrap();
        assert_relative_eq!(outcome.statistic, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(outcome.p_value, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_ks_asymptotic_tail() {
        assert_relative_eq!(kolmogorov_sf(1.36), 0.0494, epsilon = 1e-3);
        assert_relative_eq!(kolmogorov_sf(0.5), 0.9639, epsilon = 1e-3);
        assert_eq!(kolmogorov_sf(0.0), 1.0);
    }

    #[test]
    fn test_ks_rejects_empty_and_nan() {
        assert!(ks_two_sample(&[], &[1.0]).is_err());
        assert!(ks_two_sample(&[f64::NAN], &[1.0]).is_err());
    }

    #[test]
    fn test_paired_t_reference_values() {
        let outcome = paired_t_test(&[0.0, 2.0, 2.0], &[1.0, 1.0, 0.0]).unwrap();
        assert_relative_eq!(outcome.statistic, 0.7559289, epsilon = 1e-6);
        assert_relative_eq!(outcome.p_value, 0.5286, epsilon = 1e-3);
    }

    #[test]
    fn test_paired_t_degenerate_inputs() {
        assert!(matches!(
            paired_t_test(&[1.0, 2.0], &[1.0]),
            Err(MathError::InvalidInput(_))
        ));
        assert!(matches!(
            paired_t_test(&[1.0], &[0.0]),
            Err(MathError::InsufficientData(_))
        ));
        assert!(matches!(
            paired_t_test(&[2.0, 3.0], &[1.0, 2.0]),
            Err(MathError::CalculationError(_))
        ));
    }
}
