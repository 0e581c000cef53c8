//! Typed records for every entity the pipeline reads or writes.
//!
//! Natural keys are rendered with `|` as separator; identifiers must not
//! contain it (enforced at the ingestion boundary).

use crate::id::{ActionId, ExecutionId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used in rendered natural keys
pub const KEY_SEPARATOR: char = '|';

/// One day of sales for a store/SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesObservation {
    /// Sales date
    pub date: NaiveDate,
    /// Store identifier
    pub store_id: String,
    /// SKU identifier
    pub sku_id: String,
    /// Units sold that day
    pub units_sold: i64,
    /// Selling price per unit
    pub selling_price: f64,
}

impl SalesObservation {
    /// Natural key `(date, store, sku)`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.date, self.store_id, self.sku_id)
    }
}

/// A physical batch on hand at a snapshot date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryBatch {
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// Store identifier
    pub store_id: String,
    /// SKU identifier
    pub sku_id: String,
    /// Batch identifier
    pub batch_id: String,
    /// Expiry date of the batch
    pub expiry_date: NaiveDate,
    /// Units on hand
    pub on_hand_qty: u32,
}

impl InventoryBatch {
    /// Natural key `(snapshot_date, store, sku, batch)`
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.snapshot_date, self.store_id, self.sku_id, self.batch_id
        )
    }
}

/// SKU master data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuInfo {
    /// SKU identifier
    pub sku_id: String,
    /// Product category (drives liquidation recovery rates)
    #[serde(default = "default_category")]
    pub category: String,
    /// Maximum retail price
    #[serde(default)]
    pub mrp: Option<f64>,
    /// Purchase cost per unit
    #[serde(default)]
    pub unit_cost: Option<f64>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Store master data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Store identifier
    pub store_id: String,
    /// City
    #[serde(default)]
    pub city: Option<String>,
    /// Region or zone used for transfer cost estimation
    #[serde(default)]
    pub zone: Option<String>,
}

impl StoreInfo {
    /// Region used for transfer costing; falls back to the id prefix
    #[must_use]
    pub fn region(&self) -> String {
        self.zone
            .clone()
            .unwrap_or_else(|| region_of(&self.store_id))
    }
}

/// Region derived from a store id when no topology is known
#[must_use]
pub fn region_of(store_id: &str) -> String {
    store_id.chars().take(2).collect()
}

/// Rolling sales statistics for a store/SKU at a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityFeature {
    /// Snapshot date
    pub date: NaiveDate,
    /// Store identifier
    pub store_id: String,
    /// SKU identifier
    pub sku_id: String,
    /// Mean units/day over the trailing 7 days
    pub v7: f64,
    /// Mean units/day over the trailing 14 days
    pub v14: f64,
    /// Mean units/day over the full window
    pub v30: f64,
    /// Standard deviation of daily units over the full window
    pub volatility: f64,
    /// Days in the zero-filled series
    pub history_days: u32,
}

impl VelocityFeature {
    /// Natural key `(date, store, sku)`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.date, self.store_id, self.sku_id)
    }
}

/// Expiry risk for one batch at a snapshot date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRisk {
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// Store identifier
    pub store_id: String,
    /// SKU identifier
    pub sku_id: String,
    /// Batch identifier
    pub batch_id: String,
    /// Days until expiry (negative when already expired)
    pub days_to_expiry: i64,
    /// Units expected to sell before expiry
    pub expected_sales_to_expiry: f64,
    /// Units projected to remain unsold at expiry
    pub at_risk_units: u32,
    /// Monetary value of the at-risk units
    pub at_risk_value: f64,
    /// Unit price used for valuation
    pub unit_price: f64,
    /// Urgency score in `[0, 100]`
    pub risk_score: f64,
}

impl BatchRisk {
    /// Natural key `(snapshot_date, store, sku, batch)`
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.snapshot_date, self.store_id, self.sku_id, self.batch_id
        )
    }
}

/// Kind of mitigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Move stock to a faster-selling store
    Transfer,
    /// Discount the batch
    Markdown,
    /// Sell off to a salvage channel
    Liquidate,
}

impl ActionType {
    /// Stable name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::Markdown => "MARKDOWN",
            Self::Liquidate => "LIQUIDATE",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval workflow status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Generated, awaiting review
    Proposed,
    /// Approved for execution
    Approved,
    /// Executed
    Done,
    /// Rejected by an operator
    Rejected,
}

/// A ranked mitigation recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    /// Deterministic identifier
    pub action_id: ActionId,
    /// Snapshot date the proposal was derived for
    pub snapshot_date: NaiveDate,
    /// Mitigation kind
    pub action_type: ActionType,
    /// Store holding the batch
    pub from_store: String,
    /// Destination store (transfers only)
    pub to_store: Option<String>,
    /// SKU identifier
    pub sku_id: String,
    /// Batch identifier
    pub batch_id: String,
    /// Units covered by the proposal
    pub qty: u32,
    /// Discount percentage, 0-100 (markdowns only)
    pub discount_pct: Option<f64>,
    /// Estimated recovery, never negative
    pub expected_savings: f64,
    /// Secondary ranking signal in `[0, 1]`
    pub feasibility_score: f64,
    /// Workflow status
    pub status: ActionStatus,
}

impl ActionProposal {
    /// Natural key used to derive the action id
    #[must_use]
    pub fn natural_key(
        snapshot_date: NaiveDate,
        action_type: ActionType,
        from_store: &str,
        to_store: Option<&str>,
        sku_id: &str,
        batch_id: &str,
    ) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            snapshot_date,
            action_type,
            from_store,
            to_store.unwrap_or("-"),
            sku_id,
            batch_id
        )
    }
}

/// Execution status recorded in the job log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// In progress
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Stable name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Job name
    pub job_name: String,
    /// Job type
    pub job_type: String,
    /// Status
    pub status: JobStatus,
    /// Start instant
    pub started_at: DateTime<Utc>,
    /// Completion instant
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// Effective parameters
    pub parameters: serde_json::Value,
    /// Stage data on completion
    pub result_summary: Option<serde_json::Value>,
}

impl JobExecutionRecord {
    /// Wall-clock duration, once completed
    #[must_use]
    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Retry count reported in the result summary
    #[must_use]
    pub fn retry_count(&self) -> u64 {
        self.result_summary
            .as_ref()
            .and_then(|summary| summary.get("retry_count"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }
}

/// Last successful processing of an input table by a stage for a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTrackingRecord {
    /// Input table
    pub table_name: String,
    /// Stage name
    pub processing_type: String,
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// When the stage last succeeded
    pub last_processed_at: DateTime<Utc>,
    /// Rows the stage produced
    pub records_processed: u64,
    /// Hex digest of the inputs
    pub content_hash: String,
    /// Why the stage last re-ran
    pub change_summary: String,
}

impl ChangeTrackingRecord {
    /// Natural key `(table, stage, date)`
    #[must_use]
    pub fn key(&self) -> String {
        tracking_key(&self.table_name, &self.processing_type, self.snapshot_date)
    }
}

/// Render a change-tracking key
#[must_use]
pub fn tracking_key(table_name: &str, processing_type: &str, snapshot_date: NaiveDate) -> String {
    format!("{}|{}|{}", table_name, processing_type, snapshot_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_natural_keys() {
        let batch = InventoryBatch {
            snapshot_date: date("2024-03-01"),
            store_id: "S1".to_string(),
            sku_id: "SKU9".to_string(),
            batch_id: "B7".to_string(),
            expiry_date: date("2024-03-05"),
            on_hand_qty: 10,
        };
        assert_eq!(batch.key(), "2024-03-01|S1|SKU9|B7");
    }

    #[test]
    fn test_region_fallback() {
        let store = StoreInfo {
            store_id: "NY-041".to_string(),
            city: None,
            zone: None,
        };
        assert_eq!(store.region(), "NY");

        let zoned = StoreInfo {
            zone: Some("east".to_string()),
            ..store
        };
        assert_eq!(zoned.region(), "east");
    }

    #[test]
    fn test_action_type_serde_names() {
        let json = serde_json::to_string(&ActionType::Liquidate).unwrap();
        assert_eq!(json, "\"LIQUIDATE\"");
        let status: JobStatus = serde_json::from_str("\"SUCCEEDED\"").unwrap();
        assert_eq!(status, JobStatus::Succeeded);
    }

    #[test]
    fn test_execution_duration_and_retries() {
        let started = Utc::now();
        let record = JobExecutionRecord {
            execution_id: ExecutionId::from_raw(1),
            job_name: "nightly_feature_build".to_string(),
            job_type: "FEATURE_BUILD".to_string(),
            status: JobStatus::Succeeded,
            started_at: started,
            completed_at: Some(started + chrono::Duration::milliseconds(1500)),
            error_message: None,
            parameters: serde_json::json!({}),
            result_summary: Some(serde_json::json!({ "retry_count": 2 })),
        };
        assert_eq!(record.duration_seconds(), Some(1.5));
        assert_eq!(record.retry_count(), 2);
    }

    #[test]
    fn test_sku_info_defaults() {
        let sku: SkuInfo = serde_json::from_str(r#"{"sku_id":"A"}"#).unwrap();
        assert_eq!(sku.category, "general");
        assert!(sku.mrp.is_none());
    }
}
