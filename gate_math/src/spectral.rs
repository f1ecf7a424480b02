//! Spectral measures of a time series

use crate::descriptive::mean;
use crate::{MathError, Result};

/// Relative power below which a periodogram bin counts as empty
const POWER_FLOOR: f64 = 1e-12;

/// One-sided periodogram of the mean-removed series
///
/// Bins run from frequency 0 up to Nyquist. Interior bins are doubled to fold
/// in the negative frequencies; the overall scale is arbitrary because callers
/// only use relative power.
pub fn periodogram(values: &[f64]) -> Result<Vec<f64>> {
    let mu = mean(values)?;
    let n = values.len();
    let centered: Vec<f64> = values.iter().map(|v| v - mu).collect();

    let bins = n / 2 + 1;
    let mut power = Vec::with_capacity(bins);
    for k in 0..bins {
        let (mut re, mut im) = (0.0, 0.0);
        for (t, &x) in centered.iter().enumerate() {
            let angle = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
            re += x * angle.cos();
            im += x * angle.sin();
        }
        let is_edge = k == 0 || (n % 2 == 0 && k == n / 2);
        let scale = if is_edge { 1.0 } else { 2.0 };
        power.push(scale * (re * re + im * im) / n as f64);
    }

    Ok(power)
}

/// Normalised spectral entropy in `[0, 1]`
///
/// Near 0 for a series dominated by a single frequency, near 1 for white
/// noise.
pub fn spectral_entropy(values: &[f64]) -> Result<f64> {
    let power = periodogram(values)?;
    let peak = power.iter().cloned().fold(0.0_f64, f64::max);

    let positive: Vec<f64> = power
        .into_iter()
        .filter(|&p| p > peak * POWER_FLOOR && p > 0.0)
        .collect();
    if positive.len() < 2 {
        return Err(MathError::InsufficientData(
            "Spectral entropy needs at least two frequencies with power".to_string(),
        ));
    }

    let total: f64 = positive.iter().sum();
    let entropy: f64 = positive
        .iter()
        .map(|p| p / total)
        .map(|p| -p * p.ln())
        .sum();

    Ok(entropy / (positive.len() as f64).ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_pure_tone_has_low_entropy() {
        let values: Vec<f64> = (0..64)
            .map(|t| {
                let t = t as f64;
                (2.0 * PI * t / 8.0).sin() + 0.1 * (2.0 * PI * t / 4.0).sin()
            })
            .collect();
        // Power sits almost entirely in the period-8 bin
        assert!(spectral_entropy(&values).unwrap() < 0.3);
    }

    #[test]
    fn test_chirp_spreads_power() {
        let values: Vec<f64> = (0..32)
            .map(|t| (PI * (t * t) as f64 / 32.0).cos())
            .collect();
        let entropy = spectral_entropy(&values).unwrap();
        assert!(entropy > 0.6 && entropy <= 1.0);
    }

    #[test]
    fn test_constant_series_is_rejected() {
        assert!(spectral_entropy(&[3.0; 10]).is_err());
    }
}
