//! Observation loading and holdout splitting

use crate::error::{ForecastError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Key identifying one point of one series
pub type SeriesKey = (String, NaiveDateTime);

/// Accepted layouts for the `ds` column
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp written either as a date or as a datetime
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }

    Err(ForecastError::DataError(format!(
        "Unrecognised timestamp: {text:?}"
    )))
}

/// Format a timestamp, dropping the time of day when it is midnight
///
/// Sub-second precision is kept so the text parses back to the same key.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.time() == NaiveTime::MIN {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    }
}

/// One observed value of one series
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Series identifier
    pub unique_id: String,
    /// Timestamp of the observation
    pub ds: NaiveDateTime,
    /// Observed value
    pub y: f64,
}

impl Observation {
    /// Create a new observation
    pub fn new(unique_id: impl Into<String>, ds: NaiveDateTime, y: f64) -> Self {
        Self {
            unique_id: unique_id.into(),
            ds,
            y,
        }
    }

    /// Join key of this observation
    pub fn key(&self) -> SeriesKey {
        (self.unique_id.clone(), self.ds)
    }
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    unique_id: String,
    ds: String,
    y: f64,
}

/// Data loader for `unique_id, ds, y` tables
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load observations from a CSV file with a header row
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Observation>> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load observations from any CSV source
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Vec<Observation>> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut observations = Vec::new();

        for record in csv_reader.deserialize::<RawObservation>() {
            let raw = record?;
            if !raw.y.is_finite() {
                return Err(ForecastError::DataError(format!(
                    "Non-finite y for series '{}' at {}",
                    raw.unique_id, raw.ds
                )));
            }
            observations.push(Observation {
                ds: parse_timestamp(&raw.ds)?,
                unique_id: raw.unique_id,
                y: raw.y,
            });
        }

        if observations.is_empty() {
            return Err(ForecastError::DataError(
                "No observations found in data".to_string(),
            ));
        }

        Ok(observations)
    }
}

/// Group observations by series, each group sorted by timestamp
pub fn group_by_series(observations: &[Observation]) -> BTreeMap<String, Vec<Observation>> {
    let mut groups: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
    for obs in observations {
        groups.entry(obs.unique_id.clone()).or_default().push(obs.clone());
    }
    for series in groups.values_mut() {
        series.sort_by_key(|obs| obs.ds);
    }
    groups
}

/// Split every series into training history and its last `horizon` points
///
/// Both halves come back ordered by `(unique_id, ds)`.
pub fn split_holdout(
    observations: &[Observation],
    horizon: usize,
) -> Result<(Vec<Observation>, Vec<Observation>)> {
    if horizon == 0 {
        return Err(ForecastError::ValidationError(
            "Horizon must be at least 1".to_string(),
        ));
    }

    let mut history = Vec::new();
    let mut actuals = Vec::new();

    for (series_id, series) in group_by_series(observations) {
        if series.len() <= horizon {
            return Err(ForecastError::ValidationError(format!(
                "Series '{}' has {} points, needs more than the horizon {}",
                series_id,
                series.len(),
                horizon
            )));
        }
        let cut = series.len() - horizon;
        history.extend_from_slice(&series[..cut]);
        actuals.extend_from_slice(&series[cut..]);
    }

    Ok((history, actuals))
}
