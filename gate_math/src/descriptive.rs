//! Descriptive statistics over plain `f64` slices
//!
//! Every function here treats its input as already cleaned: callers drop
//! missing observations before calling in, so an empty slice is an error
//! rather than a silent zero.

use crate::{MathError, Result};

/// Arithmetic mean of the values
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot compute the mean of an empty sample".to_string(),
        ));
    }

    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (denominator `n`)
pub fn population_variance(values: &[f64]) -> Result<f64> {
    let mu = mean(values)?;
    let sum_sq = values.iter().map(|&x| (x - mu).powi(2)).sum::<f64>();

    Ok(sum_sq / values.len() as f64)
}

/// Sample standard deviation (denominator `n - 1`)
pub fn sample_std(values: &[f64]) -> Result<f64> {
    if values.len() < 2 {
        return Err(MathError::InsufficientData(format!(
            "Sample standard deviation needs at least 2 points, got {}",
            values.len()
        )));
    }

    let mu = mean(values)?;
    let sum_sq = values.iter().map(|&x| (x - mu).powi(2)).sum::<f64>();

    Ok((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Round to a fixed number of decimal places
///
/// # Examples
///
/// ```
/// use gate_math::round_to;
///
/// assert_eq!(round_to(0.75623, 3), 0.756);
/// assert_eq!(round_to(6.5, 4), 6.5);
/// ```
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }

    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}
