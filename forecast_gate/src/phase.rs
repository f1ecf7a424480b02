//! Phase gating of optional checks
//!
//! A run's phase is a single integer. Each optional feature switches on once
//! the phase reaches its threshold; below every threshold a run only produces
//! core metrics.

use crate::config::PhaseThresholds;

/// Optional features controlled by the run phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Paired significance test against the baseline model
    SignificanceTest,
    /// Residual drift detection
    DriftMonitor,
    /// Short serving digest of the selected outcome
    ServeHash,
    /// Detected drift fails the run instead of being advisory
    DriftHardGate,
    /// Residual error decomposition
    ErrorBreakdown,
}

impl Feature {
    /// Every feature, in evaluation order
    pub const ALL: [Feature; 5] = [
        Feature::SignificanceTest,
        Feature::DriftMonitor,
        Feature::ServeHash,
        Feature::DriftHardGate,
        Feature::ErrorBreakdown,
    ];
}

/// Minimum phase at which `feature` is active
pub fn activation_phase(feature: Feature, thresholds: &PhaseThresholds) -> u32 {
    match feature {
        Feature::SignificanceTest => thresholds.significance_test,
        Feature::DriftMonitor => thresholds.drift_monitor,
        Feature::ServeHash => thresholds.serve_hash,
        Feature::DriftHardGate => thresholds.drift_hard_gate,
        Feature::ErrorBreakdown => thresholds.error_breakdown,
    }
}

/// Whether `feature` runs at `phase`
pub fn is_enabled(feature: Feature, phase: u32, thresholds: &PhaseThresholds) -> bool {
    phase >= activation_phase(feature, thresholds)
}

/// Features active at `phase`
pub fn enabled_features(phase: u32, thresholds: &PhaseThresholds) -> Vec<Feature> {
    Feature::ALL
        .into_iter()
        .filter(|&f| is_enabled(f, phase, thresholds))
        .collect()
}
