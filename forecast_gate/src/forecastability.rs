//! How forecastable is a series?
//!
//! Classifies a series from its demand interval, dispersion and spectral
//! entropy, the same profile recorded next to every baseline run.

use crate::error::{ForecastError, Result};
use gate_math::{mean, round_to, sample_std, spectral_entropy};
use serde::{Deserialize, Serialize};

/// Qualitative forecastability label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastabilityClass {
    Lumpy,
    Intermittent,
    Noisy,
    #[serde(rename = "Strongly Seasonal")]
    StronglySeasonal,
    Moderate,
}

impl ForecastabilityClass {
    /// Map the three statistics onto a label
    pub fn classify(adi: f64, cv2: f64, entropy: f64) -> Self {
        if adi >= 1.32 && cv2 >= 0.49 {
            Self::Lumpy
        } else if adi >= 1.32 {
            Self::Intermittent
        } else if entropy > 0.6 {
            Self::Noisy
        } else if entropy < 0.3 {
            Self::StronglySeasonal
        } else {
            Self::Moderate
        }
    }
}

/// Forecastability profile of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecastability {
    /// Average demand interval: points per non-zero point
    #[serde(rename = "ADI")]
    pub adi: f64,
    /// Squared coefficient of variation
    #[serde(rename = "CV2")]
    pub cv2: f64,
    /// Normalised spectral entropy
    #[serde(rename = "SpectralEntropy")]
    pub spectral_entropy: f64,
    pub classification: ForecastabilityClass,
}

/// Profile a single series
pub fn forecastability(values: &[f64]) -> Result<Forecastability> {
    let nonzero = values.iter().filter(|&&v| v != 0.0).count();
    if nonzero == 0 {
        return Err(ForecastError::DataError(
            "Forecastability is undefined for an all-zero series".to_string(),
        ));
    }

    let adi = values.len() as f64 / nonzero as f64;
    let mu = mean(values)?;
    let cv2 = (sample_std(values)? / mu).powi(2);
    let entropy = spectral_entropy(values)?;

    Ok(Forecastability {
        adi: round_to(adi, 2),
        cv2: round_to(cv2, 2),
        spectral_entropy: round_to(entropy, 3),
        classification: ForecastabilityClass::classify(adi, cv2, entropy),
    })
}
