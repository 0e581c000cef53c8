//! Storage traits consumed by the engines and the orchestrator.
//!
//! Every per-date write is transactional: all rows for the date commit or
//! none do. Reads return rows in natural-key order.

use crate::error::StoreResult;
use chrono::{DateTime, NaiveDate, Utc};
use shelflife_core::{
    ActionProposal, BatchRisk, ChangeTrackingRecord, ExecutionId, InventoryBatch,
    JobExecutionRecord, JobStatus, SalesObservation, SkuInfo, StoreInfo, VelocityFeature,
};

/// Daily sales history
pub trait SalesSource {
    /// Sales observations with `start <= date <= end`
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn sales_between(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<SalesObservation>>;
}

/// Inventory snapshots
pub trait InventorySource {
    /// Batches on hand at a snapshot date
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn inventory_at(&self, date: NaiveDate) -> StoreResult<Vec<InventoryBatch>>;
}

/// SKU and store master data
pub trait Catalog {
    /// Look up a SKU
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn sku(&self, sku_id: &str) -> StoreResult<Option<SkuInfo>>;

    /// All known stores
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn stores(&self) -> StoreResult<Vec<StoreInfo>>;
}

/// Derived analytics tables
pub trait AnalyticsStore {
    /// Upsert velocity features for a date, returning rows written
    ///
    /// `rows` become the complete feature set of `date`; rows of that date
    /// missing from `rows` are removed.
    ///
    /// # Errors
    ///
    /// Returns error if a row is dated otherwise or the write fails; nothing is written then
    fn upsert_features(&self, date: NaiveDate, rows: &[VelocityFeature]) -> StoreResult<usize>;

    /// Velocity features at a date
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn features_at(&self, date: NaiveDate) -> StoreResult<Vec<VelocityFeature>>;

    /// Upsert batch risk rows for a date, returning rows written
    ///
    /// `rows` become the complete risk set of `date`.
    ///
    /// # Errors
    ///
    /// Returns error if a row is dated otherwise or the write fails; nothing is written then
    fn upsert_risk(&self, date: NaiveDate, rows: &[BatchRisk]) -> StoreResult<usize>;

    /// Batch risk rows at a date
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn risk_at(&self, date: NaiveDate) -> StoreResult<Vec<BatchRisk>>;

    /// Replace all proposals for a date with a ranked list
    ///
    /// # Errors
    ///
    /// Returns error if a row is dated otherwise or the write fails; nothing is written then
    fn replace_actions(&self, date: NaiveDate, actions: &[ActionProposal]) -> StoreResult<usize>;

    /// Proposals for a date in rank order
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn actions_at(&self, date: NaiveDate) -> StoreResult<Vec<ActionProposal>>;
}

/// Request to open a new execution record
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    /// Job name
    pub job_name: String,
    /// Job type
    pub job_type: String,
    /// Effective parameters
    pub parameters: serde_json::Value,
    /// Start instant
    pub started_at: DateTime<Utc>,
    /// RUNNING records started before this are closed as abandoned
    pub stale_before: DateTime<Utc>,
}

/// Terminal state of an execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFinish {
    /// SUCCEEDED or FAILED
    pub status: JobStatus,
    /// Completion instant
    pub completed_at: DateTime<Utc>,
    /// Failure description
    pub error_message: Option<String>,
    /// Stage data
    pub result_summary: Option<serde_json::Value>,
}

/// Message recorded on executions closed because they went stale
pub const ABANDONED_MESSAGE: &str = "abandoned";

/// Append-only job execution log
pub trait JobLog {
    /// Atomically check for a RUNNING execution of the job and open a new one
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a non-stale RUNNING execution exists
    fn begin_execution(&self, request: NewExecution) -> StoreResult<JobExecutionRecord>;

    /// Close an execution
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown execution id
    fn finish_execution(
        &self,
        execution_id: ExecutionId,
        finish: ExecutionFinish,
    ) -> StoreResult<JobExecutionRecord>;

    /// Most recent execution of a job
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn latest_execution(&self, job_name: &str) -> StoreResult<Option<JobExecutionRecord>>;

    /// Up to `limit` executions of a job, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn executions(&self, job_name: &str, limit: usize) -> StoreResult<Vec<JobExecutionRecord>>;

    /// Executions started at or after `since`, optionally for one job, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn executions_since(
        &self,
        job_name: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<JobExecutionRecord>>;
}

/// Change tracking for incremental processing
pub trait ChangeLog {
    /// Tracking record for `(table, stage, date)`
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails
    fn tracking(
        &self,
        table_name: &str,
        processing_type: &str,
        snapshot_date: NaiveDate,
    ) -> StoreResult<Option<ChangeTrackingRecord>>;

    /// Upsert a tracking record
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn record_tracking(&self, record: &ChangeTrackingRecord) -> StoreResult<()>;
}

/// Loading of typed source rows
pub trait Ingest {
    /// Upsert sales observations by `(date, store, sku)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for malformed rows; nothing is written then
    fn append_sales(&self, rows: &[SalesObservation]) -> StoreResult<usize>;

    /// Upsert inventory batches by `(date, store, sku, batch)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for malformed rows; nothing is written then
    fn put_inventory(&self, rows: &[InventoryBatch]) -> StoreResult<usize>;

    /// Upsert SKU master rows
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for malformed rows; nothing is written then
    fn put_skus(&self, rows: &[SkuInfo]) -> StoreResult<usize>;

    /// Upsert store master rows
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for malformed rows; nothing is written then
    fn put_stores(&self, rows: &[StoreInfo]) -> StoreResult<usize>;
}

/// Everything the pipeline needs from a backend
pub trait Store:
    SalesSource + InventorySource + Catalog + AnalyticsStore + JobLog + ChangeLog + Ingest + Send + Sync
{
}

impl<T> Store for T where
    T: SalesSource
        + InventorySource
        + Catalog
        + AnalyticsStore
        + JobLog
        + ChangeLog
        + Ingest
        + Send
        + Sync
{
}
