//! Persistent store on redb.
//!
//! Every table maps a natural key to a JSON-encoded record. Each trait call
//! runs in its own transaction, so a per-date write commits whole or not at
//! all, and the job check-and-insert survives process restarts.

use crate::error::{StoreError, StoreResult};
use crate::keys::{self, check_dates};
use crate::traits::{
    ABANDONED_MESSAGE, AnalyticsStore, Catalog, ChangeLog, ExecutionFinish, Ingest,
    InventorySource, JobLog, NewExecution, SalesSource,
};
use chrono::{DateTime, NaiveDate, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shelflife_core::model::tracking_key;
use shelflife_core::{
    ActionProposal, BatchRisk, ChangeTrackingRecord, ExecutionId, InventoryBatch,
    JobExecutionRecord, JobStatus, SalesObservation, SkuInfo, StoreInfo, VelocityFeature,
};
use std::path::Path;

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const SALES: RecordTable = TableDefinition::new("sales_daily");
const INVENTORY: RecordTable = TableDefinition::new("inventory_batches");
const SKUS: RecordTable = TableDefinition::new("sku_master");
const STORES: RecordTable = TableDefinition::new("store_master");
const FEATURES: RecordTable = TableDefinition::new("features_store_sku");
const RISK: RecordTable = TableDefinition::new("batch_risk");
const ACTIONS: RecordTable = TableDefinition::new("actions");
const JOBS: RecordTable = TableDefinition::new("job_executions");
const TRACKING: RecordTable = TableDefinition::new("change_tracking");
const EXECUTION_INDEX: TableDefinition<'static, u64, &'static str> =
    TableDefinition::new("execution_index");
const META: TableDefinition<'static, &'static str, u64> = TableDefinition::new("meta");

const LAST_EXECUTION_ID: &str = "last_execution_id";

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Store backed by a single redb file
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database file and make sure every table exists
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or initialized
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        for table in [SALES, INVENTORY, SKUS, STORES, FEATURES, RISK, ACTIONS, JOBS, TRACKING] {
            txn.open_table(table)?;
        }
        txn.open_table(EXECUTION_INDEX)?;
        txn.open_table(META)?;
        txn.commit()?;
        tracing::debug!(path = %path.display(), "opened redb store");
        Ok(Self { db })
    }

    fn scan<T: DeserializeOwned>(&self, table: RecordTable, lo: &str, hi: &str) -> StoreResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let mut rows = Vec::new();
        for entry in table.range::<&str>(lo..hi)? {
            let (_, value) = entry?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    fn scan_all<T: DeserializeOwned>(&self, table: RecordTable) -> StoreResult<Vec<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    fn get<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StoreResult<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let value = table.get(key)?;
        value.map(|guard| decode(guard.value())).transpose()
    }

    fn put_all(&self, table: RecordTable, rows: &[(String, Vec<u8>)]) -> StoreResult<usize> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table)?;
            for (key, value) in rows {
                table.insert(key.as_str(), value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(rows.len())
    }

    /// Replace every row keyed under `date` in one transaction
    fn put_date(
        &self,
        table: RecordTable,
        date: NaiveDate,
        rows: &[(String, Vec<u8>)],
    ) -> StoreResult<usize> {
        let (lo, hi) = keys::date_bounds(date, date);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table)?;
            table.retain_in::<&str, _>(lo.as_str()..hi.as_str(), |_, _| false)?;
            for (key, value) in rows {
                table.insert(key.as_str(), value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(rows.len())
    }

    fn encode_rows<'a, T, I>(rows: I) -> StoreResult<Vec<(String, Vec<u8>)>>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (String, &'a T)>,
    {
        rows.into_iter()
            .map(|(key, row)| Ok((key, encode(row)?)))
            .collect()
    }
}

impl SalesSource for RedbStore {
    fn sales_between(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<SalesObservation>> {
        let (lo, hi) = keys::date_bounds(start, end);
        self.scan(SALES, &lo, &hi)
    }
}

impl InventorySource for RedbStore {
    fn inventory_at(&self, date: NaiveDate) -> StoreResult<Vec<InventoryBatch>> {
        let (lo, hi) = keys::date_bounds(date, date);
        self.scan(INVENTORY, &lo, &hi)
    }
}

impl Catalog for RedbStore {
    fn sku(&self, sku_id: &str) -> StoreResult<Option<SkuInfo>> {
        self.get(SKUS, sku_id)
    }

    fn stores(&self) -> StoreResult<Vec<StoreInfo>> {
        self.scan_all(STORES)
    }
}

impl AnalyticsStore for RedbStore {
    fn upsert_features(&self, date: NaiveDate, rows: &[VelocityFeature]) -> StoreResult<usize> {
        check_dates(date, rows.iter().map(|r| (r.date, r.key())))?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.key(), r)))?;
        self.put_date(FEATURES, date, &encoded)
    }

    fn features_at(&self, date: NaiveDate) -> StoreResult<Vec<VelocityFeature>> {
        let (lo, hi) = keys::date_bounds(date, date);
        self.scan(FEATURES, &lo, &hi)
    }

    fn upsert_risk(&self, date: NaiveDate, rows: &[BatchRisk]) -> StoreResult<usize> {
        check_dates(date, rows.iter().map(|r| (r.snapshot_date, r.key())))?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.key(), r)))?;
        self.put_date(RISK, date, &encoded)
    }

    fn risk_at(&self, date: NaiveDate) -> StoreResult<Vec<BatchRisk>> {
        let (lo, hi) = keys::date_bounds(date, date);
        self.scan(RISK, &lo, &hi)
    }

    fn replace_actions(&self, date: NaiveDate, actions: &[ActionProposal]) -> StoreResult<usize> {
        check_dates(
            date,
            actions
                .iter()
                .map(|a| (a.snapshot_date, a.action_id.to_string())),
        )?;
        let encoded = Self::encode_rows(
            actions
                .iter()
                .enumerate()
                .map(|(rank, a)| (keys::action_key(date, rank), a)),
        )?;
        self.put_date(ACTIONS, date, &encoded)
    }

    fn actions_at(&self, date: NaiveDate) -> StoreResult<Vec<ActionProposal>> {
        let (lo, hi) = keys::date_bounds(date, date);
        self.scan(ACTIONS, &lo, &hi)
    }
}

impl JobLog for RedbStore {
    fn begin_execution(&self, request: NewExecution) -> StoreResult<JobExecutionRecord> {
        keys::validate_id("job_name", &request.job_name)?;
        let (lo, hi) = keys::prefix_bounds(&request.job_name);

        let txn = self.db.begin_write()?;
        let record = {
            let mut jobs = txn.open_table(JOBS)?;

            let mut running = Vec::new();
            for entry in jobs.range::<&str>(lo.as_str()..hi.as_str())? {
                let (key, value) = entry?;
                let record: JobExecutionRecord = decode(value.value())?;
                if record.status == JobStatus::Running {
                    running.push((key.value().to_string(), record));
                }
            }
            if running
                .iter()
                .any(|(_, r)| r.started_at >= request.stale_before)
            {
                // dropping the transaction aborts it
                return Err(StoreError::Conflict {
                    job_name: request.job_name,
                });
            }
            for (key, mut stale) in running {
                tracing::warn!(
                    job_name = %stale.job_name,
                    execution_id = %stale.execution_id,
                    "closing stale running execution"
                );
                stale.status = JobStatus::Failed;
                stale.completed_at = Some(request.started_at);
                stale.error_message = Some(ABANDONED_MESSAGE.to_string());
                jobs.insert(key.as_str(), encode(&stale)?.as_slice())?;
            }

            let mut meta = txn.open_table(META)?;
            let last = meta.get(LAST_EXECUTION_ID)?.map(|g| g.value()).unwrap_or(0);
            let execution_id = ExecutionId::from_raw(last).next();
            meta.insert(LAST_EXECUTION_ID, execution_id.as_u64())?;

            let record = JobExecutionRecord {
                execution_id,
                job_name: request.job_name,
                job_type: request.job_type,
                status: JobStatus::Running,
                started_at: request.started_at,
                completed_at: None,
                error_message: None,
                parameters: request.parameters,
                result_summary: None,
            };
            let key = keys::execution_key(&record.job_name, execution_id);
            jobs.insert(key.as_str(), encode(&record)?.as_slice())?;

            let mut index = txn.open_table(EXECUTION_INDEX)?;
            index.insert(execution_id.as_u64(), key.as_str())?;
            record
        };
        txn.commit()?;
        Ok(record)
    }

    fn finish_execution(
        &self,
        execution_id: ExecutionId,
        finish: ExecutionFinish,
    ) -> StoreResult<JobExecutionRecord> {
        let not_found = || StoreError::NotFound {
            kind: "Execution",
            id: execution_id.to_string(),
        };

        let txn = self.db.begin_write()?;
        let record = {
            let index = txn.open_table(EXECUTION_INDEX)?;
            let key = index
                .get(execution_id.as_u64())?
                .map(|g| g.value().to_string())
                .ok_or_else(not_found)?;

            let mut jobs = txn.open_table(JOBS)?;
            let current = jobs.get(key.as_str())?.map(|g| decode(g.value())).transpose()?;
            let mut record: JobExecutionRecord = current.ok_or_else(not_found)?;
            record.status = finish.status;
            record.completed_at = Some(finish.completed_at);
            record.error_message = finish.error_message;
            record.result_summary = finish.result_summary;
            jobs.insert(key.as_str(), encode(&record)?.as_slice())?;
            record
        };
        txn.commit()?;
        Ok(record)
    }

    fn latest_execution(&self, job_name: &str) -> StoreResult<Option<JobExecutionRecord>> {
        let (lo, hi) = keys::prefix_bounds(job_name);
        let txn = self.db.begin_read()?;
        let jobs = txn.open_table(JOBS)?;
        let mut range = jobs.range::<&str>(lo.as_str()..hi.as_str())?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(decode(value.value())?))
            }
            None => Ok(None),
        }
    }

    fn executions(&self, job_name: &str, limit: usize) -> StoreResult<Vec<JobExecutionRecord>> {
        let (lo, hi) = keys::prefix_bounds(job_name);
        let txn = self.db.begin_read()?;
        let jobs = txn.open_table(JOBS)?;
        let mut records = Vec::new();
        for entry in jobs.range::<&str>(lo.as_str()..hi.as_str())?.rev().take(limit) {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn executions_since(
        &self,
        job_name: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<JobExecutionRecord>> {
        let mut records: Vec<JobExecutionRecord> = match job_name {
            Some(name) => {
                let (lo, hi) = keys::prefix_bounds(name);
                self.scan(JOBS, &lo, &hi)?
            }
            None => self.scan_all(JOBS)?,
        };
        records.retain(|r| r.started_at >= since);
        records.sort_by(|a, b| b.execution_id.cmp(&a.execution_id));
        Ok(records)
    }
}

impl ChangeLog for RedbStore {
    fn tracking(
        &self,
        table_name: &str,
        processing_type: &str,
        snapshot_date: NaiveDate,
    ) -> StoreResult<Option<ChangeTrackingRecord>> {
        self.get(
            TRACKING,
            &tracking_key(table_name, processing_type, snapshot_date),
        )
    }

    fn record_tracking(&self, record: &ChangeTrackingRecord) -> StoreResult<()> {
        self.put_all(TRACKING, &[(record.key(), encode(record)?)])?;
        Ok(())
    }
}

impl Ingest for RedbStore {
    fn append_sales(&self, rows: &[SalesObservation]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_sales)?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.key(), r)))?;
        self.put_all(SALES, &encoded)
    }

    fn put_inventory(&self, rows: &[InventoryBatch]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_inventory)?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.key(), r)))?;
        self.put_all(INVENTORY, &encoded)
    }

    fn put_skus(&self, rows: &[SkuInfo]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_sku)?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.sku_id.clone(), r)))?;
        self.put_all(SKUS, &encoded)
    }

    fn put_stores(&self, rows: &[StoreInfo]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_store)?;
        let encoded = Self::encode_rows(rows.iter().map(|r| (r.store_id.clone(), r)))?;
        self.put_all(STORES, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shelflife_core::{ActionId, ActionStatus, ActionType};
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn open() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("shelflife.redb")).unwrap();
        (dir, store)
    }

    fn new_execution(name: &str, at: DateTime<Utc>) -> NewExecution {
        NewExecution {
            job_name: name.to_string(),
            job_type: "RISK_SCORING".to_string(),
            parameters: serde_json::json!({ "snapshot_date": "2024-03-01" }),
            started_at: at,
            stale_before: at - Duration::hours(6),
        }
    }

    fn action(day: &str, batch: &str, savings: f64) -> ActionProposal {
        ActionProposal {
            action_id: ActionId::from_name(batch),
            snapshot_date: date(day),
            action_type: ActionType::Markdown,
            from_store: "S1".to_string(),
            to_store: None,
            sku_id: "A".to_string(),
            batch_id: batch.to_string(),
            qty: 5,
            discount_pct: Some(30.0),
            expected_savings: savings,
            feasibility_score: 0.5,
            status: ActionStatus::Proposed,
        }
    }

    #[test]
    fn test_sales_roundtrip_and_range() {
        let (_dir, store) = open();
        let rows: Vec<SalesObservation> = ["2024-03-01", "2024-03-02", "2024-03-10"]
            .iter()
            .map(|d| SalesObservation {
                date: date(d),
                store_id: "S1".to_string(),
                sku_id: "A".to_string(),
                units_sold: 4,
                selling_price: 2.5,
            })
            .collect();
        assert_eq!(store.append_sales(&rows).unwrap(), 3);
        let window = store
            .sales_between(date("2024-03-01"), date("2024-03-02"))
            .unwrap();
        assert_eq!(window, rows[..2].to_vec());
    }

    #[test]
    fn test_replace_actions_keeps_rank_order() {
        let (_dir, store) = open();
        let day = date("2024-03-01");
        store
            .replace_actions(day, &[action("2024-03-01", "B1", 10.0), action("2024-03-01", "B2", 5.0)])
            .unwrap();
        store
            .replace_actions(day, &[action("2024-03-01", "B3", 7.0)])
            .unwrap();
        let stored = store.actions_at(day).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].batch_id, "B3");
    }

    #[test]
    fn test_risk_upsert_replaces_only_its_date() {
        let (_dir, store) = open();
        let risk = |day: &str, batch: &str| BatchRisk {
            snapshot_date: date(day),
            store_id: "S1".to_string(),
            sku_id: "A".to_string(),
            batch_id: batch.to_string(),
            days_to_expiry: 3,
            expected_sales_to_expiry: 1.0,
            at_risk_units: 4,
            at_risk_value: 8.0,
            unit_price: 2.0,
            risk_score: 60.0,
        };
        let first = date("2024-03-01");
        let second = date("2024-03-02");
        store.upsert_risk(first, &[risk("2024-03-01", "B1"), risk("2024-03-01", "B2")]).unwrap();
        store.upsert_risk(second, &[risk("2024-03-02", "B1")]).unwrap();
        store.upsert_risk(first, &[risk("2024-03-01", "B2")]).unwrap();

        let rows = store.risk_at(first).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_id, "B2");
        assert_eq!(store.risk_at(second).unwrap().len(), 1);
    }

    #[test]
    fn test_conflict_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shelflife.redb");
        let now = Utc::now();
        {
            let store = RedbStore::open(&path).unwrap();
            store.begin_execution(new_execution("nightly_risk_scoring", now)).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        let result = store.begin_execution(new_execution("nightly_risk_scoring", now));
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[test]
    fn test_execution_lifecycle() {
        let (_dir, store) = open();
        let now = Utc::now();
        let first = store.begin_execution(new_execution("job", now)).unwrap();
        let done = store
            .finish_execution(
                first.execution_id,
                ExecutionFinish {
                    status: JobStatus::Succeeded,
                    completed_at: now + Duration::seconds(2),
                    error_message: None,
                    result_summary: Some(serde_json::json!({ "retry_count": 0 })),
                },
            )
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.duration_seconds(), Some(2.0));

        let second = store.begin_execution(new_execution("job", now)).unwrap();
        assert_eq!(second.execution_id.as_u64(), 2);
        assert_eq!(
            store.latest_execution("job").unwrap().map(|r| r.execution_id),
            Some(second.execution_id)
        );
        assert_eq!(store.executions("job", 10).unwrap().len(), 2);
        assert_eq!(
            store
                .executions_since(None, now - Duration::minutes(1))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_stale_execution_closed_on_begin() {
        let (_dir, store) = open();
        let old = Utc::now() - Duration::hours(8);
        store.begin_execution(new_execution("job", old)).unwrap();
        store.begin_execution(new_execution("job", Utc::now())).unwrap();
        let history = store.executions("job", 10).unwrap();
        assert_eq!(history[0].status, JobStatus::Running);
        assert_eq!(history[1].status, JobStatus::Failed);
    }

    #[test]
    fn test_tracking_upsert() {
        let (_dir, store) = open();
        let day = date("2024-03-01");
        let mut record = ChangeTrackingRecord {
            table_name: "sales_daily".to_string(),
            processing_type: "features".to_string(),
            snapshot_date: day,
            last_processed_at: Utc::now(),
            records_processed: 3,
            content_hash: "ab".repeat(32),
            change_summary: "no previous record".to_string(),
        };
        store.record_tracking(&record).unwrap();
        record.records_processed = 4;
        store.record_tracking(&record).unwrap();
        let stored = store.tracking("sales_daily", "features", day).unwrap();
        assert_eq!(stored, Some(record));
        assert!(store.tracking("sales_daily", "risk_scoring", day).unwrap().is_none());
    }

    #[test]
    fn test_catalog_lookup() {
        let (_dir, store) = open();
        store
            .put_skus(&[SkuInfo {
                sku_id: "A".to_string(),
                category: "food".to_string(),
                mrp: Some(4.0),
                unit_cost: None,
            }])
            .unwrap();
        assert_eq!(store.sku("A").unwrap().map(|s| s.category), Some("food".to_string()));
        assert!(store.sku("B").unwrap().is_none());
        assert!(store.stores().unwrap().is_empty());
    }
}
