//! Scoring forecasts against held-out actuals

use crate::data::{Observation, SeriesKey};
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use chrono::NaiveDateTime;
use gate_math::round_to;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Accuracy of one model over the holdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    /// Model column name
    pub model: String,
    /// Mean absolute error
    pub mae: f64,
    /// Mean signed error (actual - predicted)
    pub bias: f64,
    /// Ranking key: `mae + |bias|`, lower is better
    pub score: f64,
}

/// Rounded metrics as persisted in `baseline_metrics.json`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "Bias")]
    pub bias: f64,
    #[serde(rename = "Score")]
    pub score: f64,
}

/// Scores of every evaluated model, in evaluation order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelMetrics {
    scores: Vec<ModelScore>,
}

impl ModelMetrics {
    /// All scores in evaluation order
    pub fn scores(&self) -> &[ModelScore] {
        &self.scores
    }

    /// Score of a single model
    pub fn get(&self, model: &str) -> Option<&ModelScore> {
        self.scores.iter().find(|s| s.model == model)
    }

    /// Model with the lowest score; ties go to the earliest model
    pub fn best_model(&self) -> Option<&ModelScore> {
        self.scores.iter().fold(None, |best: Option<&ModelScore>, s| match best {
            Some(b) if b.score <= s.score => Some(b),
            _ => Some(s),
        })
    }

    /// Metrics rounded to `decimals`, keyed by model name
    pub fn summary(&self, decimals: u32) -> BTreeMap<String, MetricSummary> {
        self.scores
            .iter()
            .map(|s| {
                let summary = MetricSummary {
                    mae: round_to(s.mae, decimals),
                    bias: round_to(s.bias, decimals),
                    score: round_to(s.score, decimals),
                };
                (s.model.clone(), summary)
            })
            .collect()
    }
}

/// One (series, timestamp) row of residuals, one column per model
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualRow {
    /// Series identifier
    pub unique_id: String,
    /// Timestamp
    pub ds: NaiveDateTime,
    /// `actual - predicted` per model; `None` when either side is missing
    pub values: Vec<Option<f64>>,
}

/// Wide residual table keyed uniquely by (series, timestamp)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResidualTable {
    models: Vec<String>,
    rows: Vec<ResidualRow>,
}

impl ResidualTable {
    /// Build a table for `models` from rows already ordered and deduplicated
    pub fn from_rows(models: Vec<String>, rows: Vec<ResidualRow>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.values.len() != models.len()) {
            return Err(ForecastError::ValidationError(format!(
                "Residual row for '{}' has {} values, expected {}",
                bad.unique_id,
                bad.values.len(),
                models.len()
            )));
        }
        Ok(Self { models, rows })
    }

    /// Build a single-model table from a plain residual sequence
    ///
    /// Rows get consecutive daily timestamps from 1970-01-01 under series id
    /// `"series"`.
    pub fn from_values(model: &str, values: &[f64]) -> Self {
        let start = NaiveDateTime::default();
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, &v)| ResidualRow {
                unique_id: "series".to_string(),
                ds: start + chrono::Duration::days(i as i64),
                values: vec![Some(v)],
            })
            .collect();
        Self {
            models: vec![model.to_string()],
            rows,
        }
    }

    /// Model column names
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Rows ordered by (series, timestamp)
    pub fn rows(&self) -> &[ResidualRow] {
        &self.rows
    }

    /// Non-missing residuals of one model with their timestamps
    pub fn series(&self, model: &str) -> Result<Vec<(NaiveDateTime, f64)>> {
        let idx = self
            .models
            .iter()
            .position(|m| m == model)
            .ok_or_else(|| ForecastError::InvalidParameter(format!("No residuals for model '{model}'")))?;

        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.values[idx].map(|v| (row.ds, v)))
            .collect())
    }

    /// Non-missing residuals of one model in table order
    pub fn values(&self, model: &str) -> Result<Vec<f64>> {
        Ok(self.series(model)?.into_iter().map(|(_, v)| v).collect())
    }
}

/// Output of the evaluation engine
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Per-model accuracy
    pub metrics: ModelMetrics,
    /// Consolidated residuals
    pub residuals: ResidualTable,
    /// Per model, forecast rows that found no actual value
    pub unmatched: BTreeMap<String, usize>,
}

/// Score each model column against the actuals
///
/// Forecast rows are left-joined to actuals on `(unique_id, ds)`. A row
/// without an actual (or without a prediction) yields a missing residual that
/// is excluded from every aggregate. A model with no joinable row at all is a
/// [`ForecastError::MissingJoinKey`].
pub fn evaluate_forecasts(
    forecasts: &ForecastTable,
    actuals: &[Observation],
    models: &[String],
) -> Result<Evaluation> {
    let mut truth: HashMap<SeriesKey, f64> = HashMap::with_capacity(actuals.len());
    for obs in actuals {
        truth.entry(obs.key()).or_insert(obs.y);
    }

    let mut scores = Vec::with_capacity(models.len());
    let mut unmatched = BTreeMap::new();
    let mut consolidated: BTreeMap<SeriesKey, Vec<Option<f64>>> = BTreeMap::new();

    for (m, model) in models.iter().enumerate() {
        let mut residuals = Vec::new();
        let mut missing = 0usize;

        for (row, predicted) in forecasts.column(model)? {
            let key = row.key();
            let residual = match (truth.get(&key), predicted) {
                (Some(actual), Some(pred)) => Some(actual - pred),
                _ => None,
            };

            let slot = consolidated
                .entry(key)
                .or_insert_with(|| vec![None; models.len()]);
            if slot[m].is_none() {
                slot[m] = residual;
            }

            match residual {
                Some(r) => residuals.push(r),
                None => missing += 1,
            }
        }

        if residuals.is_empty() {
            return Err(ForecastError::MissingJoinKey {
                model: model.clone(),
            });
        }
        if missing > 0 {
            warn!(model = %model, rows = missing, "forecast rows without a matching actual excluded");
            unmatched.insert(model.clone(), missing);
        }

        let n = residuals.len() as f64;
        let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;
        let bias = residuals.iter().sum::<f64>() / n;
        let score = mae + bias.abs();
        debug!(model = %model, mae, bias, score, "model evaluated");

        scores.push(ModelScore {
            model: model.clone(),
            mae,
            bias,
            score,
        });
    }

    let rows = consolidated
        .into_iter()
        .map(|((unique_id, ds), values)| ResidualRow { unique_id, ds, values })
        .collect();

    Ok(Evaluation {
        metrics: ModelMetrics { scores },
        residuals: ResidualTable {
            models: models.to_vec(),
            rows,
        },
        unmatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn fixture() -> (ForecastTable, Vec<Observation>) {
        let mut table = ForecastTable::new(vec!["good".into(), "biased".into()]);
        table.push_row("A", day(1), vec![Some(10.0), Some(12.0)]).unwrap();
        table.push_row("A", day(2), vec![Some(11.0), Some(13.0)]).unwrap();
        table.push_row("A", day(3), vec![Some(9.0), Some(14.0)]).unwrap();
        let actuals = vec![
            Observation::new("A", day(1), 10.0),
            Observation::new("A", day(2), 10.0),
            Observation::new("A", day(3), 10.0),
        ];
        (table, actuals)
    }

    #[test]
    fn test_scores_and_selection() {
        let (table, actuals) = fixture();
        let models = table.models().to_vec();
        let evaluation = evaluate_forecasts(&table, &actuals, &models).unwrap();

        let good = evaluation.metrics.get("good").unwrap();
        assert_relative_eq!(good.mae, 2.0 / 3.0);
        assert_relative_eq!(good.bias, 0.0);

        let biased = evaluation.metrics.get("biased").unwrap();
        assert_relative_eq!(biased.mae, 3.0);
        assert_relative_eq!(biased.bias, -3.0);
        assert_relative_eq!(biased.score, 6.0);

        assert_eq!(evaluation.metrics.best_model().unwrap().model, "good");
        assert_eq!(evaluation.residuals.values("biased").unwrap(), vec![-2.0, -3.0, -4.0]);
    }

    #[test]
    fn test_unmatched_rows_are_excluded() {
        let (mut table, actuals) = fixture();
        table.push_row("A", day(9), vec![Some(100.0), Some(100.0)]).unwrap();
        let models = table.models().to_vec();
        let evaluation = evaluate_forecasts(&table, &actuals, &models).unwrap();

        assert_relative_eq!(evaluation.metrics.get("good").unwrap().mae, 2.0 / 3.0);
        assert_eq!(evaluation.unmatched.get("good"), Some(&1));
        assert_eq!(evaluation.residuals.rows().len(), 4);
        assert_eq!(evaluation.residuals.rows()[3].values, vec![None, None]);
    }

    #[test]
    fn test_duplicate_keys_keep_first_residual() {
        let (mut table, actuals) = fixture();
        table.push_row("A", day(1), vec![Some(0.0), Some(0.0)]).unwrap();
        let models = table.models().to_vec();
        let evaluation = evaluate_forecasts(&table, &actuals, &models).unwrap();

        assert_eq!(evaluation.residuals.rows().len(), 3);
        assert_eq!(evaluation.residuals.rows()[0].values, vec![Some(0.0), Some(-2.0)]);
    }

    #[test]
    fn test_model_without_any_match_fails() {
        let (table, _) = fixture();
        let err = evaluate_forecasts(&table, &[], &["good".to_string()]).unwrap_err();
        assert!(matches!(err, ForecastError::MissingJoinKey { .. }));
    }

    #[test]
    fn test_summary_rounds_to_decimals() {
        let (table, actuals) = fixture();
        let models = table.models().to_vec();
        let summary = evaluate_forecasts(&table, &actuals, &models)
            .unwrap()
            .metrics
            .summary(2);

        assert_eq!(summary["good"].mae, 0.67);
        assert_eq!(summary["biased"].score, 6.0);
    }
}
