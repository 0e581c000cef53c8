//! Sales velocity and volatility features.
//!
//! For snapshot date D every store/SKU pair with sales in the trailing
//! window gets one row. The daily series runs from the pair's first
//! observation in the window through D, with missing days as zero.

use crate::summary::{FeatureRunSummary, StageStatus};
use chrono::NaiveDate;
use rayon::prelude::*;
use shelflife_core::{
    DateWindow, FeatureConfig, PipelineError, PipelineResult, SalesObservation, VelocityFeature,
};
use shelflife_storage::{AnalyticsStore, SalesSource};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rolling statistics of one daily series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity {
    /// Mean of the last 7 days, or of the whole series if shorter
    pub v7: f64,
    /// Mean of the last 14 days, or of the whole series if shorter
    pub v14: f64,
    /// Mean of the whole series
    pub v30: f64,
    /// Sample standard deviation of the whole series
    pub volatility: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn tail_mean(series: &[f64], days: usize, fallback: f64) -> f64 {
    if series.len() < days {
        fallback
    } else {
        mean(&series[series.len() - days..])
    }
}

/// Compute velocity statistics over a daily series ordered oldest first
#[must_use]
pub fn velocity(series: &[f64]) -> Velocity {
    let v30 = mean(series);
    let volatility = if series.len() < 2 {
        0.0
    } else {
        let sum_sq: f64 = series.iter().map(|x| (x - v30).powi(2)).sum();
        (sum_sq / (series.len() - 1) as f64).sqrt()
    };
    Velocity {
        v7: tail_mean(series, 7, v30),
        v14: tail_mean(series, 14, v30),
        v30,
        volatility,
    }
}

/// Zero-filled daily series per store/SKU pair, in key order
///
/// A pair with negative units maps to an error message; other pairs are
/// unaffected.
pub fn daily_series(
    window: DateWindow,
    rows: &[SalesObservation],
) -> BTreeMap<(String, String), Result<Vec<f64>, String>> {
    let mut first_seen: BTreeMap<(String, String), usize> = BTreeMap::new();
    for row in rows {
        if let Some(offset) = window.offset_of(row.date) {
            let entry = first_seen
                .entry((row.store_id.clone(), row.sku_id.clone()))
                .or_insert(offset);
            *entry = (*entry).min(offset);
        }
    }

    let len = window.len_days();
    let mut series: BTreeMap<(String, String), Result<Vec<f64>, String>> = first_seen
        .iter()
        .map(|(pair, first)| (pair.clone(), Ok(vec![0.0; len - first])))
        .collect();

    for row in rows {
        let Some(offset) = window.offset_of(row.date) else {
            continue;
        };
        let pair = (row.store_id.clone(), row.sku_id.clone());
        let first = first_seen.get(&pair).copied().unwrap_or(0);
        match series.get_mut(&pair) {
            Some(Ok(days)) if row.units_sold >= 0 => {
                days[offset - first] += row.units_sold as f64;
            }
            Some(slot @ Ok(_)) => {
                *slot = Err(format!("negative units_sold {} on {}", row.units_sold, row.date));
            }
            _ => {}
        }
    }
    series
}

fn feature_row(
    date: NaiveDate,
    pair: &(String, String),
    series: &Result<Vec<f64>, String>,
) -> PipelineResult<VelocityFeature> {
    let key = format!("{}|{}|{}", date, pair.0, pair.1);
    let series = series.as_ref().map_err(|reason| PipelineError::Computation {
        key: key.clone(),
        reason: reason.clone(),
    })?;
    let v = velocity(series);
    if ![v.v7, v.v14, v.v30, v.volatility].iter().all(|x| x.is_finite()) {
        return Err(PipelineError::Computation {
            key,
            reason: "non-finite statistic".to_string(),
        });
    }
    Ok(VelocityFeature {
        date,
        store_id: pair.0.clone(),
        sku_id: pair.1.clone(),
        v7: v.v7,
        v14: v.v14,
        v30: v.v30,
        volatility: v.volatility,
        history_days: series.len() as u32,
    })
}

/// Builds velocity features from sales history
pub struct FeatureEngine<S: ?Sized> {
    store: Arc<S>,
    config: FeatureConfig,
}

impl<S> FeatureEngine<S>
where
    S: SalesSource + AnalyticsStore + ?Sized,
{
    /// Create an engine over a store
    #[must_use]
    pub fn new(store: Arc<S>, config: FeatureConfig) -> Self {
        Self { store, config }
    }

    /// Window read for a snapshot date
    #[must_use]
    pub fn window(&self, snapshot_date: NaiveDate) -> DateWindow {
        DateWindow::trailing(snapshot_date, self.config.window_days)
    }

    /// Compute and persist features for a snapshot date
    ///
    /// # Errors
    ///
    /// Returns error if sales cannot be read or the upsert fails
    pub fn compute_features(&self, snapshot_date: NaiveDate) -> PipelineResult<FeatureRunSummary> {
        let window = self.window(snapshot_date);
        let rows = self.store.sales_between(window.start, window.end)?;
        if rows.is_empty() {
            tracing::info!(%snapshot_date, %window, "no sales in window");
            return Ok(FeatureRunSummary {
                snapshot_date,
                status: StageStatus::NoData,
                features_created: 0,
                errors: 0,
            });
        }

        let pairs: Vec<_> = daily_series(window, &rows).into_iter().collect();
        let results: Vec<PipelineResult<VelocityFeature>> = if self.config.parallel {
            pairs
                .par_iter()
                .map(|(pair, series)| feature_row(snapshot_date, pair, series))
                .collect()
        } else {
            pairs
                .iter()
                .map(|(pair, series)| feature_row(snapshot_date, pair, series))
                .collect()
        };

        let mut features = Vec::with_capacity(results.len());
        let mut errors = 0;
        for result in results {
            match result {
                Ok(row) => features.push(row),
                Err(err) => {
                    tracing::warn!(%snapshot_date, error = %err, "feature computation failed");
                    errors += 1;
                }
            }
        }

        let features_created = self.store.upsert_features(snapshot_date, &features)?;
        tracing::info!(
            %snapshot_date,
            pairs = pairs.len(),
            features_created,
            errors,
            "features computed"
        );
        Ok(FeatureRunSummary {
            snapshot_date,
            status: StageStatus::Success,
            features_created,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shelflife_storage::{Ingest, MemoryStore};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sale(day: NaiveDate, store: &str, units: i64) -> SalesObservation {
        SalesObservation {
            date: day,
            store_id: store.to_string(),
            sku_id: "A".to_string(),
            units_sold: units,
            selling_price: 2.0,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_linear_series() {
        let series: Vec<f64> = (1..=30).map(f64::from).collect();
        let v = velocity(&series);
        assert!(approx(v.v30, 15.5));
        assert!(approx(v.v14, 23.5));
        assert!(approx(v.v7, 27.0));
        assert!(v.volatility > 0.0);
    }

    #[test]
    fn test_short_history_falls_back_to_full_mean() {
        let v = velocity(&[2.0, 4.0, 6.0]);
        assert!(approx(v.v7, 4.0));
        assert!(approx(v.v14, 4.0));
        assert!(approx(v.v30, 4.0));
    }

    #[test]
    fn test_single_day_has_zero_volatility() {
        let v = velocity(&[5.0]);
        assert_eq!(v.volatility, 0.0);
        assert_eq!(v.v7, 5.0);
    }

    #[test]
    fn test_series_starts_at_first_observation() {
        let d = date("2024-03-30");
        let window = DateWindow::trailing(d, 30);
        let rows = vec![
            sale(date("2024-03-28"), "S1", 3),
            sale(date("2024-03-30"), "S1", 6),
        ];
        let series = daily_series(window, &rows);
        let s1 = series[&("S1".to_string(), "A".to_string())].clone().unwrap();
        assert_eq!(s1, vec![3.0, 0.0, 6.0]);
    }

    #[test]
    fn test_negative_units_isolated_per_pair() {
        let store = Arc::new(MemoryStore::new());
        let d = date("2024-03-30");
        store
            .append_sales(&[sale(d, "S1", -2), sale(d, "S2", 4)])
            .unwrap();
        let engine = FeatureEngine::new(store.clone(), FeatureConfig::default());
        let summary = engine.compute_features(d).unwrap();
        assert_eq!(summary.status, StageStatus::Success);
        assert_eq!(summary.features_created, 1);
        assert_eq!(summary.errors, 1);
        let rows = store.features_at(d).unwrap();
        assert_eq!(rows[0].store_id, "S2");
    }

    #[test]
    fn test_empty_window_is_no_data() {
        let store = Arc::new(MemoryStore::new());
        store
            .append_sales(&[sale(date("2024-01-01"), "S1", 4)])
            .unwrap();
        let engine = FeatureEngine::new(store.clone(), FeatureConfig::default());
        let summary = engine.compute_features(date("2024-03-30")).unwrap();
        assert_eq!(summary.status, StageStatus::NoData);
        assert!(store.features_at(date("2024-03-30")).unwrap().is_empty());
    }

    #[test]
    fn test_rerun_is_idempotent_and_parallel_matches_serial() {
        let store = Arc::new(MemoryStore::new());
        let d = date("2024-03-30");
        let rows: Vec<SalesObservation> = (0..30)
            .flat_map(|i| {
                let day = d - chrono::Duration::days(i);
                [sale(day, "S1", i % 5), sale(day, "S2", (i * 7) % 11)]
            })
            .collect();
        store.append_sales(&rows).unwrap();

        let parallel = FeatureEngine::new(store.clone(), FeatureConfig::default());
        parallel.compute_features(d).unwrap();
        let first = store.features_at(d).unwrap();

        let serial = FeatureEngine::new(
            store.clone(),
            FeatureConfig {
                parallel: false,
                ..FeatureConfig::default()
            },
        );
        serial.compute_features(d).unwrap();
        assert_eq!(store.features_at(d).unwrap(), first);
        assert_eq!(first.len(), 2);
    }

    proptest! {
        #[test]
        fn test_constant_series(u in 0u32..500, len in 1usize..=30) {
            let series = vec![f64::from(u); len];
            let v = velocity(&series);
            let u = f64::from(u);
            prop_assert!((v.v7 - u).abs() < 1e-9);
            prop_assert!((v.v14 - u).abs() < 1e-9);
            prop_assert!((v.v30 - u).abs() < 1e-9);
            prop_assert!(v.volatility.abs() < 1e-9);
        }

        #[test]
        fn test_statistics_non_negative(series in proptest::collection::vec(0u32..1000, 1..=30)) {
            let series: Vec<f64> = series.into_iter().map(f64::from).collect();
            let v = velocity(&series);
            prop_assert!(v.v7 >= 0.0 && v.v14 >= 0.0 && v.v30 >= 0.0);
            prop_assert!(v.volatility >= 0.0);
        }
    }
}
