//! # Gate Math
//!
//! Numerical building blocks for forecast validation gates.
//! This crate provides descriptive statistics, the two-sample
//! Kolmogorov-Smirnov test, the paired t-test and a spectral entropy
//! measure used to profile how forecastable a series is.

use thiserror::Error;

pub mod descriptive;
pub mod hypothesis;
pub mod spectral;

pub use descriptive::{mean, population_variance, round_to, sample_std};
pub use hypothesis::{ks_two_sample, paired_t_test, TestOutcome};
pub use spectral::spectral_entropy;

/// Errors that can occur in statistical calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for statistical operations
pub type Result<T> = std::result::Result<T, MathError>;
