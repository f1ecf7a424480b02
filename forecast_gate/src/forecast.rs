//! Forecast tables and the forecast-generation boundary
//!
//! Model fitting happens outside this crate. Anything that can produce a
//! [`ForecastTable`] implements [`Forecaster`]; the two naive baselines here
//! exist because the CI floor is defined against them.

use crate::data::{format_timestamp, group_by_series, parse_timestamp, Observation, SeriesKey};
use crate::error::{ForecastError, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;

/// Bookkeeping columns of a persisted forecast file that are not models
const META_COLUMNS: [&str; 4] = ["run_id", "horizon", "n_models", "tag"];

/// Predictions of every model for one (series, timestamp) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    /// Series identifier
    pub unique_id: String,
    /// Forecast timestamp
    pub ds: NaiveDateTime,
    /// One prediction per model, aligned with [`ForecastTable::models`]
    pub values: Vec<Option<f64>>,
}

impl ForecastRow {
    /// Join key of this row
    pub fn key(&self) -> SeriesKey {
        (self.unique_id.clone(), self.ds)
    }
}

/// Wide table of forecasts: one row per (series, timestamp), one column per model
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastTable {
    models: Vec<String>,
    rows: Vec<ForecastRow>,
}

impl ForecastTable {
    /// Create an empty table with the given model columns
    pub fn new(models: Vec<String>) -> Self {
        Self {
            models,
            rows: Vec::new(),
        }
    }

    /// Append a row; `values` must line up with the model columns
    pub fn push_row(
        &mut self,
        unique_id: impl Into<String>,
        ds: NaiveDateTime,
        values: Vec<Option<f64>>,
    ) -> Result<()> {
        if values.len() != self.models.len() {
            return Err(ForecastError::ValidationError(format!(
                "Row has {} values but the table has {} models",
                values.len(),
                self.models.len()
            )));
        }
        self.rows.push(ForecastRow {
            unique_id: unique_id.into(),
            ds,
            values,
        });
        Ok(())
    }

    /// Model column names
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// All rows in insertion order
    pub fn rows(&self) -> &[ForecastRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position of a model
    pub fn model_index(&self, model: &str) -> Result<usize> {
        self.models
            .iter()
            .position(|m| m == model)
            .ok_or_else(|| ForecastError::InvalidParameter(format!("Unknown model column '{model}'")))
    }

    /// `(row, prediction)` pairs for one model
    pub fn column<'a>(
        &'a self,
        model: &str,
    ) -> Result<impl Iterator<Item = (&'a ForecastRow, Option<f64>)> + 'a> {
        let idx = self.model_index(model)?;
        Ok(self.rows.iter().map(move |row| (row, row.values[idx])))
    }

    /// Prediction lookup by key for one model; the first row wins on duplicates
    pub fn lookup(&self, model: &str) -> Result<HashMap<SeriesKey, Option<f64>>> {
        let mut index = HashMap::with_capacity(self.rows.len());
        for (row, value) in self.column(model)? {
            index.entry(row.key()).or_insert(value);
        }
        Ok(index)
    }

    /// Append a model column computed from existing rows
    pub fn add_column(&mut self, model: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let model = model.into();
        if self.models.contains(&model) {
            return Err(ForecastError::InvalidParameter(format!(
                "Model column '{model}' already exists"
            )));
        }
        if values.len() != self.rows.len() {
            return Err(ForecastError::ValidationError(format!(
                "Column '{}' has {} values for {} rows",
                model,
                values.len(),
                self.rows.len()
            )));
        }
        self.models.push(model);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value);
        }
        Ok(())
    }

    /// Combine the columns of two tables over the rows of `self`
    ///
    /// Keys missing from `other` get empty predictions.
    pub fn merge(&self, other: &ForecastTable) -> Result<ForecastTable> {
        let mut merged = self.clone();
        for model in other.models() {
            let index = other.lookup(model)?;
            let values = self
                .rows
                .iter()
                .map(|row| index.get(&row.key()).copied().flatten())
                .collect();
            merged.add_column(model.clone(), values)?;
        }
        Ok(merged)
    }

    /// Persist as CSV with run bookkeeping columns in front of the models
    pub fn write_csv<P: AsRef<Path>>(
        &self,
        path: P,
        run_id: &str,
        horizon: usize,
        n_models: usize,
    ) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["run_id", "horizon", "n_models", "unique_id", "ds"];
        header.extend(self.models.iter().map(String::as_str));
        writer.write_record(&header)?;

        let horizon = horizon.to_string();
        let n_models = n_models.to_string();
        for row in &self.rows {
            let mut record = vec![
                run_id.to_string(),
                horizon.clone(),
                n_models.clone(),
                row.unique_id.clone(),
                format_timestamp(&row.ds),
            ];
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Reload a table written by [`ForecastTable::write_csv`] (or any CSV with
    /// `unique_id` and `ds` columns)
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let find = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                ForecastError::DataError(format!("Forecast file has no '{name}' column"))
            })
        };
        let id_idx = find("unique_id")?;
        let ds_idx = find("ds")?;

        let model_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != id_idx && *i != ds_idx && !META_COLUMNS.contains(h))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut table = ForecastTable::new(model_columns.iter().map(|(_, m)| m.clone()).collect());
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("");
            let values = model_columns
                .iter()
                .map(|(i, model)| parse_optional(field(*i), model))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(field(id_idx), parse_timestamp(field(ds_idx))?, values)?;
        }

        Ok(table)
    }
}

fn parse_optional(text: &str, model: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    text.parse::<f64>().map(Some).map_err(|_| {
        ForecastError::DataError(format!("Invalid prediction {text:?} for model '{model}'"))
    })
}

/// Producer of forecasts for the last `horizon` periods after a history
pub trait Forecaster: Debug {
    /// Column name of this forecaster's predictions
    fn name(&self) -> &str;

    /// Forecast `horizon` periods past the end of every series in `history`
    fn forecast(&self, history: &[Observation], horizon: usize) -> Result<ForecastTable>;
}

/// Run several forecasters and merge their columns into one table
pub fn forecast_all(
    forecasters: &[&dyn Forecaster],
    history: &[Observation],
    horizon: usize,
) -> Result<ForecastTable> {
    let mut combined: Option<ForecastTable> = None;
    for forecaster in forecasters {
        let table = forecaster.forecast(history, horizon)?;
        combined = Some(match combined {
            Some(acc) => acc.merge(&table)?,
            None => table,
        });
    }
    combined.ok_or_else(|| ForecastError::InvalidParameter("No forecasters supplied".to_string()))
}

/// Append `ensemble_naive`, the row-wise mean of two model columns
pub fn add_ensemble_naive(table: &mut ForecastTable, first: &str, second: &str) -> Result<()> {
    let (a, b) = (table.model_index(first)?, table.model_index(second)?);
    let values = table
        .rows()
        .iter()
        .map(|row| match (row.values[a], row.values[b]) {
            (Some(x), Some(y)) => Some((x + y) / 2.0),
            _ => None,
        })
        .collect();
    table.add_column("ensemble_naive", values)
}

/// Timestamps following the last point of a series, spaced by its final step
fn future_timestamps(series: &[Observation], horizon: usize) -> Vec<NaiveDateTime> {
    let step = match series {
        [.., prev, last] if last.ds > prev.ds => last.ds - prev.ds,
        _ => Duration::days(1),
    };
    let Some(mut current) = series.last().map(|obs| obs.ds) else {
        return Vec::new();
    };
    (0..horizon)
        .map(|_| {
            current += step;
            current
        })
        .collect()
}

/// Apply a per-series prediction rule to every series of the history
fn forecast_each_series<F>(name: &str, history: &[Observation], horizon: usize, rule: F) -> Result<ForecastTable>
where
    F: Fn(&[f64]) -> Result<Vec<f64>>,
{
    if horizon == 0 {
        return Err(ForecastError::InvalidParameter("Horizon must be at least 1".to_string()));
    }

    let mut table = ForecastTable::new(vec![name.to_string()]);
    for (series_id, series) in group_by_series(history) {
        let values: Vec<f64> = series.iter().map(|obs| obs.y).collect();
        let predictions = rule(&values)?;
        for (ds, value) in future_timestamps(&series, horizon).into_iter().zip(predictions) {
            table.push_row(series_id.clone(), ds, vec![Some(value)])?;
        }
    }
    Ok(table)
}

/// Repeats the last observed value
#[derive(Debug, Clone, Default)]
pub struct Naive;

impl Forecaster for Naive {
    fn name(&self) -> &str {
        "Naive"
    }

    fn forecast(&self, history: &[Observation], horizon: usize) -> Result<ForecastTable> {
        forecast_each_series(self.name(), history, horizon, |values| {
            let last = values.last().copied().ok_or_else(|| {
                ForecastError::DataError("Naive forecast needs at least one point".to_string())
            })?;
            Ok(vec![last; horizon])
        })
    }
}

/// Repeats the last full season
#[derive(Debug, Clone)]
pub struct SeasonalNaive {
    season_length: usize,
}

impl SeasonalNaive {
    /// Create a seasonal naive forecaster
    pub fn new(season_length: usize) -> Result<Self> {
        if season_length == 0 {
            return Err(ForecastError::InvalidParameter(
                "Season length must be positive".to_string(),
            ));
        }
        Ok(Self { season_length })
    }
}

impl Forecaster for SeasonalNaive {
    fn name(&self) -> &str {
        "SeasonalNaive"
    }

    fn forecast(&self, history: &[Observation], horizon: usize) -> Result<ForecastTable> {
        let season = self.season_length;
        forecast_each_series(self.name(), history, horizon, |values| {
            if values.len() < season {
                return Err(ForecastError::DataError(format!(
                    "Seasonal naive needs a full season of {} points, got {}",
                    season,
                    values.len()
                )));
            }
            let last_season = &values[values.len() - season..];
            Ok((0..horizon).map(|h| last_season[h % season]).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn history() -> Vec<Observation> {
        (1..=6)
            .map(|d| Observation::new("A", day(d), d as f64))
            .collect()
    }

    #[test]
    fn test_naive_and_seasonal_naive() {
        let naive = Naive.forecast(&history(), 2).unwrap();
        assert_eq!(naive.rows()[0].ds, day(7));
        assert_eq!(naive.rows()[1].values, vec![Some(6.0)]);

        let seasonal = SeasonalNaive::new(3).unwrap().forecast(&history(), 4).unwrap();
        let predictions: Vec<Option<f64>> = seasonal.rows().iter().map(|r| r.values[0]).collect();
        assert_eq!(predictions, vec![Some(4.0), Some(5.0), Some(6.0), Some(4.0)]);
    }

    #[test]
    fn test_forecast_all_and_ensemble() {
        let seasonal = SeasonalNaive::new(2).unwrap();
        let mut table = forecast_all(&[&Naive, &seasonal], &history(), 2).unwrap();
        add_ensemble_naive(&mut table, "Naive", "SeasonalNaive").unwrap();

        assert_eq!(table.models(), ["Naive", "SeasonalNaive", "ensemble_naive"]);
        assert_eq!(table.rows()[0].values, vec![Some(6.0), Some(5.0), Some(5.5)]);
        assert!(add_ensemble_naive(&mut table, "Naive", "Missing").is_err());
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut table = ForecastTable::new(vec!["a".into(), "b".into()]);
        assert!(table.push_row("A", day(1), vec![Some(1.0)]).is_err());
        assert!(table.push_row("A", day(1), vec![Some(1.0), None]).is_ok());
    }
}
