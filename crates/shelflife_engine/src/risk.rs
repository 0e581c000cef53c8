//! Batch expiry risk scoring.

use crate::pricing::PriceBook;
use crate::summary::{RiskRunSummary, StageStatus};
use chrono::NaiveDate;
use rayon::prelude::*;
use shelflife_core::{
    BatchRisk, DateWindow, InventoryBatch, PipelineError, PipelineResult, RiskConfig,
};
use shelflife_storage::{AnalyticsStore, Catalog, InventorySource, SalesSource};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Units projected to remain unsold at expiry, in whole units
#[must_use]
pub fn at_risk_units(on_hand: u32, expected_sales: f64) -> u32 {
    let remaining = (f64::from(on_hand) - expected_sales).clamp(0.0, f64::from(on_hand));
    remaining.floor() as u32
}

fn raw_score(ratio: f64, days: f64, config: &RiskConfig) -> f64 {
    let k = config.ratio_steepness;
    let ratio_term = (1.0 - (-k * ratio).exp()) / (1.0 - (-k).exp());
    let urgency_term = (-days / config.urgency_decay_days).exp();
    100.0 * (config.ratio_weight * ratio_term + config.urgency_weight * urgency_term)
}

/// Urgency score in `[0, 100]`, rounded to one decimal
///
/// Non-decreasing in `at_risk / on_hand` and non-increasing in
/// `days_to_expiry`. Expired batches with stock at risk score at least
/// `expired_floor`.
#[must_use]
pub fn risk_score(at_risk: u32, on_hand: u32, days_to_expiry: i64, config: &RiskConfig) -> f64 {
    if on_hand == 0 || at_risk == 0 {
        return 0.0;
    }
    let ratio = f64::from(at_risk.min(on_hand)) / f64::from(on_hand);
    let score = if days_to_expiry < 0 {
        let floor = config.expired_floor + (100.0 - config.expired_floor) * ratio;
        floor.max(raw_score(ratio, 0.0, config))
    } else {
        raw_score(ratio, days_to_expiry as f64, config)
    };
    (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

fn score_batch(
    batch: &InventoryBatch,
    v14: Option<f64>,
    prices: &PriceBook,
    config: &RiskConfig,
) -> PipelineResult<BatchRisk> {
    let days_to_expiry = (batch.expiry_date - batch.snapshot_date).num_days();
    let expected = v14.unwrap_or(0.0) * days_to_expiry.max(0) as f64;
    if !expected.is_finite() || expected < 0.0 {
        return Err(PipelineError::Computation {
            key: batch.key(),
            reason: format!("invalid expected sales {}", expected),
        });
    }
    let unit_price = prices
        .unit_price(&batch.store_id, &batch.sku_id)
        .ok_or_else(|| PipelineError::Computation {
            key: batch.key(),
            reason: "no unit price available".to_string(),
        })?;

    let at_risk = at_risk_units(batch.on_hand_qty, expected);
    Ok(BatchRisk {
        snapshot_date: batch.snapshot_date,
        store_id: batch.store_id.clone(),
        sku_id: batch.sku_id.clone(),
        batch_id: batch.batch_id.clone(),
        days_to_expiry,
        expected_sales_to_expiry: expected,
        at_risk_units: at_risk,
        at_risk_value: f64::from(at_risk) * unit_price,
        unit_price,
        risk_score: risk_score(at_risk, batch.on_hand_qty, days_to_expiry, config),
    })
}

/// Scores inventory batches against velocity features
pub struct RiskEngine<S: ?Sized> {
    store: Arc<S>,
    config: RiskConfig,
    window_days: u32,
    parallel: bool,
}

impl<S> RiskEngine<S>
where
    S: SalesSource + InventorySource + Catalog + AnalyticsStore + ?Sized,
{
    /// Create an engine; `window_days` bounds the selling-price lookup
    #[must_use]
    pub fn new(store: Arc<S>, config: RiskConfig, window_days: u32) -> Self {
        Self {
            store,
            config,
            window_days,
            parallel: true,
        }
    }

    /// Score batches on the rayon pool (default) or sequentially
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Score and persist every batch on hand at a snapshot date
    ///
    /// # Errors
    ///
    /// Returns error if inputs cannot be read or the upsert fails
    pub fn compute_risk(&self, snapshot_date: NaiveDate) -> PipelineResult<RiskRunSummary> {
        let batches = self.store.inventory_at(snapshot_date)?;
        if batches.is_empty() {
            tracing::info!(%snapshot_date, "no inventory at snapshot");
            return Ok(RiskRunSummary {
                snapshot_date,
                status: StageStatus::NoData,
                batches_scored: 0,
                errors: 0,
                total_at_risk_value: 0.0,
            });
        }

        let v14: BTreeMap<(String, String), f64> = self
            .store
            .features_at(snapshot_date)?
            .into_iter()
            .map(|f| ((f.store_id, f.sku_id), f.v14))
            .collect();
        let prices = PriceBook::load(
            self.store.as_ref(),
            DateWindow::trailing(snapshot_date, self.window_days),
            batches.iter().map(|b| b.sku_id.as_str()),
            self.config.default_price,
        )?;

        let config = &self.config;
        let score = |batch: &InventoryBatch| {
            let velocity = v14
                .get(&(batch.store_id.clone(), batch.sku_id.clone()))
                .copied();
            score_batch(batch, velocity, &prices, config)
        };
        let results: Vec<PipelineResult<BatchRisk>> = if self.parallel {
            batches.par_iter().map(score).collect()
        } else {
            batches.iter().map(score).collect()
        };

        let mut rows = Vec::with_capacity(results.len());
        let mut errors = 0;
        for result in results {
            match result {
                Ok(row) => rows.push(row),
                Err(err) => {
                    tracing::warn!(%snapshot_date, error = %err, "risk scoring failed");
                    errors += 1;
                }
            }
        }

        let total_at_risk_value: f64 = rows.iter().map(|r| r.at_risk_value).sum();
        let batches_scored = self.store.upsert_risk(snapshot_date, &rows)?;
        tracing::info!(
            %snapshot_date,
            batches_scored,
            errors,
            total_at_risk_value,
            "risk scored"
        );
        Ok(RiskRunSummary {
            snapshot_date,
            status: StageStatus::Success,
            batches_scored,
            errors,
            total_at_risk_value,
        })
    }
}
