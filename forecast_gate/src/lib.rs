//! # Forecast Gate
//!
//! Validation and gating engine for forecast pipeline runs.
//!
//! ## Features
//!
//! - Scoring of forecast columns against held-out actuals (MAE, bias, score)
//! - CI gate selecting the best model against a reference floor
//! - Residual drift detection with a two-sample Kolmogorov-Smirnov test
//! - Error decomposition and paired significance tests
//! - Cascade checks between aggregation levels, with anchor bias
//! - SHA-256 audit ledgers written last and verified on demand
//!
//! ## Phases
//!
//! A run carries a single integer phase. Below the configured thresholds
//! (2 by default) only core metrics are produced; from there on the
//! significance test, drift monitor, serve hash and error breakdown switch on,
//! and detected drift fails the run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use forecast_gate::artifacts::ForecastRun;
//! use forecast_gate::cascade::enforce_cascade;
//! use forecast_gate::config::GateConfig;
//! use forecast_gate::data::{split_holdout, DataLoader};
//! use forecast_gate::forecast::{add_ensemble_naive, forecast_all, Naive, SeasonalNaive};
//! use forecast_gate::pipeline::run_gate;
//! use forecast_gate::tracking::JsonlTracker;
//!
//! # fn main() -> forecast_gate::Result<()> {
//! let config = GateConfig::from_file("gate.toml")?;
//! let observations = DataLoader::from_csv("store_daily.csv")?;
//! let (history, actuals) = split_holdout(&observations, 14)?;
//!
//! let seasonal = SeasonalNaive::new(7)?;
//! let mut forecasts = forecast_all(&[&Naive, &seasonal], &history, 14)?;
//! add_ensemble_naive(&mut forecasts, "Naive", "SeasonalNaive")?;
//!
//! // A store-level run may only proceed if the region-level run passed
//! let parent = enforce_cascade("outputs/region_north")?;
//!
//! let run = ForecastRun::new("store-7", "store_7", 14, 2, "outputs/store_7")
//!     .with_aggregation_level("store");
//! let mut tracker = JsonlTracker::new("outputs/runs.jsonl");
//! let sealed = run_gate(run, config, forecasts, history, actuals, Some(parent), &mut tracker)?;
//!
//! assert!(sealed.is_verified());
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod audit;
pub mod cascade;
pub mod ci_runtime;
pub mod config;
pub mod data;
pub mod decomposition;
pub mod drift;
pub mod error;
pub mod evaluation;
pub mod forecast;
pub mod forecastability;
pub mod gate;
pub mod phase;
pub mod pipeline;
pub mod significance;
pub mod tracking;

// Re-export commonly used types
pub use crate::artifacts::{BaselineMetrics, ForecastRun};
pub use crate::audit::{compute_digest, verify_ledger, write_ledger, AuditLedger, Mismatch};
pub use crate::cascade::{compute_anchor_bias, enforce_cascade, CascadeContext};
pub use crate::config::GateConfig;
pub use crate::data::{DataLoader, Observation};
pub use crate::decomposition::{decompose_errors, ErrorBreakdown};
pub use crate::drift::{detect_drift, DriftReport};
pub use crate::error::{ForecastError, Result};
pub use crate::evaluation::{evaluate_forecasts, ModelMetrics, ResidualTable};
pub use crate::forecast::{ForecastTable, Forecaster};
pub use crate::phase::{is_enabled, Feature};
pub use crate::pipeline::{run_gate, GateRun};
pub use crate::significance::significance_test;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
