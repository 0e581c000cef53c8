//! Stage runners.
//!
//! A stage is one engine invocation for one snapshot date, wrapped with
//! change detection. Runners are synchronous; the orchestrator moves them
//! onto the blocking pool.

use crate::change::{self, ChangeDecision, InputDigest};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shelflife_core::{ChangeTrackingRecord, FeatureConfig, PipelineConfig, PipelineResult};
use shelflife_engine::{
    ActionEngine, ActionRequest, ActionTotals, FeatureEngine, RiskEngine, StageStatus,
};
use shelflife_storage::Store;
use std::fmt;
use std::sync::Arc;

/// One step of the nightly pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Velocity features
    Features,
    /// Batch risk scores
    RiskScoring,
    /// Mitigation proposals
    ActionGeneration,
}

impl Stage {
    /// Stable name, also the tracking record's processing type
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Features => "features",
            Self::RiskScoring => "risk_scoring",
            Self::ActionGeneration => "action_generation",
        }
    }

    /// Input table whose changes trigger a recompute
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Features => "sales_daily",
            Self::RiskScoring => "inventory_batches",
            Self::ActionGeneration => "batch_risk",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved inputs of one run
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// Trailing window length
    pub window_days: u32,
    /// Action generation parameters
    pub action_request: ActionRequest,
    /// Skip unchanged inputs
    pub incremental: bool,
}

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage
    pub stage: Stage,
    /// Outcome
    pub status: StageStatus,
    /// Rows written
    pub records: u64,
    /// Engine summary
    pub detail: Value,
    /// Why the stage recomputed or was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_summary: Option<String>,
}

/// Message reported for stages with unchanged inputs
pub const SKIPPED_MESSAGE: &str = "skipped: inputs unchanged";

/// Runs stages against a store
pub struct StageRunner<S: ?Sized> {
    store: Arc<S>,
    config: PipelineConfig,
}

impl<S: ?Sized> Clone for StageRunner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Store + ?Sized> StageRunner<S> {
    /// Create a runner
    #[must_use]
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    fn digest(&self, stage: Stage, ctx: &StageContext) -> PipelineResult<InputDigest> {
        let store = self.store.as_ref();
        match stage {
            Stage::Features => change::sales_digest(
                store,
                shelflife_core::DateWindow::trailing(ctx.snapshot_date, ctx.window_days),
            ),
            Stage::RiskScoring => change::risk_inputs_digest(
                store,
                ctx.snapshot_date,
                ctx.window_days,
                &self.config.risk,
            ),
            Stage::ActionGeneration => change::action_inputs_digest(
                store,
                ctx.snapshot_date,
                &ctx.action_request,
                &self.config.actions,
            ),
        }
    }

    /// Run one stage, skipping it when its inputs are unchanged
    ///
    /// # Errors
    ///
    /// Returns error if inputs cannot be read or outputs cannot be written
    pub fn run(&self, stage: Stage, ctx: &StageContext) -> PipelineResult<StageReport> {
        let date = ctx.snapshot_date;
        let digest = self.digest(stage, ctx)?;
        let previous = self.store.tracking(stage.table(), stage.as_str(), date)?;

        let change_summary = match change::detect(previous.as_ref(), &digest) {
            ChangeDecision::Unchanged if ctx.incremental => {
                tracing::info!(%stage, snapshot_date = %date, hash = %digest.hash.short(), "inputs unchanged");
                return Ok(StageReport {
                    stage,
                    status: StageStatus::Skipped,
                    records: 0,
                    detail: json!({
                        "snapshot_date": date,
                        "status": StageStatus::Skipped,
                        "message": SKIPPED_MESSAGE,
                    }),
                    change_summary: Some(SKIPPED_MESSAGE.to_string()),
                });
            }
            ChangeDecision::Unchanged => "forced recompute".to_string(),
            ChangeDecision::Changed { summary } => summary,
        };

        let (status, records, detail) = match stage {
            Stage::Features => self.features(ctx)?,
            Stage::RiskScoring => self.risk(ctx)?,
            Stage::ActionGeneration => self.actions(ctx, digest.records)?,
        };

        if status == StageStatus::Success {
            self.store.record_tracking(&ChangeTrackingRecord {
                table_name: stage.table().to_string(),
                processing_type: stage.as_str().to_string(),
                snapshot_date: date,
                last_processed_at: Utc::now(),
                records_processed: records,
                content_hash: digest.hash.to_hex(),
                change_summary: change_summary.clone(),
            })?;
        }

        tracing::info!(%stage, snapshot_date = %date, %status, records, "stage finished");
        Ok(StageReport {
            stage,
            status,
            records,
            detail,
            change_summary: Some(change_summary),
        })
    }

    fn features(&self, ctx: &StageContext) -> PipelineResult<(StageStatus, u64, Value)> {
        let config = FeatureConfig {
            window_days: ctx.window_days,
            ..self.config.features.clone()
        };
        let summary = FeatureEngine::new(Arc::clone(&self.store), config)
            .compute_features(ctx.snapshot_date)?;
        Ok((
            summary.status,
            summary.features_created as u64,
            serde_json::to_value(&summary)?,
        ))
    }

    fn risk(&self, ctx: &StageContext) -> PipelineResult<(StageStatus, u64, Value)> {
        let summary = RiskEngine::new(
            Arc::clone(&self.store),
            self.config.risk.clone(),
            ctx.window_days,
        )
        .with_parallel(self.config.features.parallel)
        .compute_risk(ctx.snapshot_date)?;
        Ok((
            summary.status,
            summary.batches_scored as u64,
            serde_json::to_value(&summary)?,
        ))
    }

    fn actions(
        &self,
        ctx: &StageContext,
        risk_rows: u64,
    ) -> PipelineResult<(StageStatus, u64, Value)> {
        let date = ctx.snapshot_date;
        if risk_rows == 0 {
            tracing::info!(snapshot_date = %date, "no risk rows at snapshot");
            let detail = json!({ "snapshot_date": date, "status": StageStatus::NoData });
            return Ok((StageStatus::NoData, 0, detail));
        }

        let proposals = ActionEngine::new(Arc::clone(&self.store), self.config.actions.clone())
            .generate_actions(date, &ctx.action_request)?;
        let written = self.store.replace_actions(date, &proposals)?;
        let totals = ActionTotals::of(&proposals);
        let detail = json!({
            "snapshot_date": date,
            "status": StageStatus::Success,
            "actions_generated": written,
            "transfers": totals.transfers,
            "markdowns": totals.markdowns,
            "liquidations": totals.liquidations,
            "total_expected_savings": totals.total_expected_savings,
        });
        Ok((StageStatus::Success, written as u64, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelflife_core::{InventoryBatch, SalesObservation, SkuInfo};
    use shelflife_storage::{AnalyticsStore, ChangeLog, Ingest, MemoryStore};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn ctx(incremental: bool) -> StageContext {
        StageContext {
            snapshot_date: date("2024-03-10"),
            window_days: 30,
            action_request: ActionRequest::default(),
            incremental,
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let sales: Vec<SalesObservation> = (0..10)
            .map(|i| SalesObservation {
                date: date("2024-03-01") + chrono::Duration::days(i),
                store_id: "S1".to_string(),
                sku_id: "A".to_string(),
                units_sold: 2,
                selling_price: 3.0,
            })
            .collect();
        store.append_sales(&sales).unwrap();
        store
            .put_inventory(&[InventoryBatch {
                snapshot_date: date("2024-03-10"),
                store_id: "S1".to_string(),
                sku_id: "A".to_string(),
                batch_id: "B1".to_string(),
                expiry_date: date("2024-03-12"),
                on_hand_qty: 50,
            }])
            .unwrap();
        store
            .put_skus(&[SkuInfo {
                sku_id: "A".to_string(),
                category: "dairy".to_string(),
                mrp: Some(4.0),
                unit_cost: Some(2.0),
            }])
            .unwrap();
        store
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Features.table(), "sales_daily");
        assert_eq!(Stage::RiskScoring.as_str(), "risk_scoring");
        assert_eq!(
            serde_json::to_string(&Stage::ActionGeneration).unwrap(),
            "\"action_generation\""
        );
    }

    #[test]
    fn test_second_run_skipped() {
        let store = seeded();
        let runner = StageRunner::new(store.clone(), PipelineConfig::default());
        let first = runner.run(Stage::Features, &ctx(true)).unwrap();
        assert_eq!(first.status, StageStatus::Success);
        assert_eq!(first.records, 1);
        assert_eq!(first.change_summary.as_deref(), Some("no previous record"));

        let tracked = store
            .tracking("sales_daily", "features", date("2024-03-10"))
            .unwrap()
            .unwrap();
        assert_eq!(tracked.records_processed, 1);

        let second = runner.run(Stage::Features, &ctx(true)).unwrap();
        assert_eq!(second.status, StageStatus::Skipped);
        assert_eq!(second.change_summary.as_deref(), Some(SKIPPED_MESSAGE));
    }

    #[test]
    fn test_forced_recompute() {
        let store = seeded();
        let runner = StageRunner::new(store, PipelineConfig::default());
        runner.run(Stage::Features, &ctx(true)).unwrap();
        let forced = runner.run(Stage::Features, &ctx(false)).unwrap();
        assert_eq!(forced.status, StageStatus::Success);
        assert_eq!(forced.change_summary.as_deref(), Some("forced recompute"));
    }

    #[test]
    fn test_changed_input_recomputes() {
        let store = seeded();
        let runner = StageRunner::new(store.clone(), PipelineConfig::default());
        runner.run(Stage::Features, &ctx(true)).unwrap();
        store
            .append_sales(&[SalesObservation {
                date: date("2024-03-10"),
                store_id: "S1".to_string(),
                sku_id: "A".to_string(),
                units_sold: 9,
                selling_price: 3.0,
            }])
            .unwrap();
        let report = runner.run(Stage::Features, &ctx(true)).unwrap();
        assert_eq!(report.status, StageStatus::Success);
        assert!(report
            .change_summary
            .as_deref()
            .is_some_and(|s| s.starts_with("content changed")));
    }

    #[test]
    fn test_no_data_not_tracked() {
        let store = Arc::new(MemoryStore::new());
        let runner = StageRunner::new(store.clone(), PipelineConfig::default());
        let report = runner.run(Stage::RiskScoring, &ctx(true)).unwrap();
        assert_eq!(report.status, StageStatus::NoData);
        assert!(store
            .tracking("inventory_batches", "risk_scoring", date("2024-03-10"))
            .unwrap()
            .is_none());
        let again = runner.run(Stage::RiskScoring, &ctx(true)).unwrap();
        assert_eq!(again.status, StageStatus::NoData);
    }

    #[test]
    fn test_all_stages_in_sequence() {
        let store = seeded();
        let runner = StageRunner::new(store.clone(), PipelineConfig::default());
        let c = ctx(true);
        runner.run(Stage::Features, &c).unwrap();
        let risk = runner.run(Stage::RiskScoring, &c).unwrap();
        assert_eq!(risk.records, 1);
        let actions = runner.run(Stage::ActionGeneration, &c).unwrap();
        assert_eq!(actions.status, StageStatus::Success);
        assert_eq!(
            actions.records as usize,
            store.actions_at(c.snapshot_date).unwrap().len()
        );
        assert!(actions.detail.get("total_expected_savings").is_some());
    }
}
