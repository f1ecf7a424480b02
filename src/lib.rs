//! # Forecast Kernel
//!
//! Umbrella crate for the forecast validation workspace.
//!
//! - [`gate`] re-exports `forecast_gate`: evaluation, CI and drift gates,
//!   cascades and audit ledgers
//! - [`math`] re-exports `gate_math`: the statistics behind the gates
//!
//! ## Example
//!
//! ```
//! use forecast_kernel::gate::drift::detect_drift_in;
//!
//! let mut residuals = vec![0.0; 26];
//! residuals.extend(vec![5.0; 14]);
//!
//! let report = detect_drift_in(&residuals, 14, 0.05).unwrap();
//! assert!(report.drift_detected);
//! ```

pub use forecast_gate as gate;
pub use gate_math as math;

pub use forecast_gate::{ForecastError, GateConfig, GateRun, Result};
