//! In-memory store.
//!
//! All tables live behind one `RwLock`, so every write, including the
//! check-and-insert of a job execution, is atomic.

use crate::error::{StoreError, StoreResult};
use crate::keys::{self, check_dates};
use crate::traits::{
    ABANDONED_MESSAGE, AnalyticsStore, Catalog, ChangeLog, ExecutionFinish, Ingest,
    InventorySource, JobLog, NewExecution, SalesSource,
};
use chrono::{DateTime, NaiveDate, Utc};
use shelflife_core::model::tracking_key;
use shelflife_core::{
    ActionProposal, BatchRisk, ChangeTrackingRecord, ExecutionId, InventoryBatch,
    JobExecutionRecord, JobStatus, SalesObservation, SkuInfo, StoreInfo, VelocityFeature,
};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    sales: BTreeMap<String, SalesObservation>,
    inventory: BTreeMap<NaiveDate, BTreeMap<String, InventoryBatch>>,
    skus: BTreeMap<String, SkuInfo>,
    stores: BTreeMap<String, StoreInfo>,
    features: BTreeMap<NaiveDate, BTreeMap<String, VelocityFeature>>,
    risk: BTreeMap<NaiveDate, BTreeMap<String, BatchRisk>>,
    actions: BTreeMap<NaiveDate, Vec<ActionProposal>>,
    // execution id N lives at index N - 1
    jobs: Vec<JobExecutionRecord>,
    tracking: BTreeMap<String, ChangeTrackingRecord>,
}

/// Store holding every table in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl SalesSource for MemoryStore {
    fn sales_between(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<SalesObservation>> {
        let (lo, hi) = keys::date_bounds(start, end);
        let inner = self.read()?;
        Ok(inner.sales.range(lo..hi).map(|(_, row)| row.clone()).collect())
    }
}

impl InventorySource for MemoryStore {
    fn inventory_at(&self, date: NaiveDate) -> StoreResult<Vec<InventoryBatch>> {
        let inner = self.read()?;
        Ok(inner
            .inventory
            .get(&date)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl Catalog for MemoryStore {
    fn sku(&self, sku_id: &str) -> StoreResult<Option<SkuInfo>> {
        Ok(self.read()?.skus.get(sku_id).cloned())
    }

    fn stores(&self) -> StoreResult<Vec<StoreInfo>> {
        Ok(self.read()?.stores.values().cloned().collect())
    }
}

impl AnalyticsStore for MemoryStore {
    fn upsert_features(&self, date: NaiveDate, rows: &[VelocityFeature]) -> StoreResult<usize> {
        check_dates(date, rows.iter().map(|r| (r.date, r.key())))?;
        let table = rows.iter().map(|r| (r.key(), r.clone())).collect();
        self.write()?.features.insert(date, table);
        Ok(rows.len())
    }

    fn features_at(&self, date: NaiveDate) -> StoreResult<Vec<VelocityFeature>> {
        let inner = self.read()?;
        Ok(inner
            .features
            .get(&date)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn upsert_risk(&self, date: NaiveDate, rows: &[BatchRisk]) -> StoreResult<usize> {
        check_dates(date, rows.iter().map(|r| (r.snapshot_date, r.key())))?;
        let table = rows.iter().map(|r| (r.key(), r.clone())).collect();
        self.write()?.risk.insert(date, table);
        Ok(rows.len())
    }

    fn risk_at(&self, date: NaiveDate) -> StoreResult<Vec<BatchRisk>> {
        let inner = self.read()?;
        Ok(inner
            .risk
            .get(&date)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn replace_actions(&self, date: NaiveDate, actions: &[ActionProposal]) -> StoreResult<usize> {
        check_dates(
            date,
            actions
                .iter()
                .map(|a| (a.snapshot_date, a.action_id.to_string())),
        )?;
        let mut inner = self.write()?;
        inner.actions.insert(date, actions.to_vec());
        Ok(actions.len())
    }

    fn actions_at(&self, date: NaiveDate) -> StoreResult<Vec<ActionProposal>> {
        Ok(self.read()?.actions.get(&date).cloned().unwrap_or_default())
    }
}

impl JobLog for MemoryStore {
    fn begin_execution(&self, request: NewExecution) -> StoreResult<JobExecutionRecord> {
        keys::validate_id("job_name", &request.job_name)?;
        let mut inner = self.write()?;

        let live = inner.jobs.iter().any(|r| {
            r.job_name == request.job_name
                && r.status == JobStatus::Running
                && r.started_at >= request.stale_before
        });
        if live {
            return Err(StoreError::Conflict {
                job_name: request.job_name,
            });
        }

        for record in inner.jobs.iter_mut().filter(|r| {
            r.job_name == request.job_name && r.status == JobStatus::Running
        }) {
            tracing::warn!(
                job_name = %record.job_name,
                execution_id = %record.execution_id,
                "closing stale running execution"
            );
            record.status = JobStatus::Failed;
            record.completed_at = Some(request.started_at);
            record.error_message = Some(ABANDONED_MESSAGE.to_string());
        }

        let record = JobExecutionRecord {
            execution_id: ExecutionId::from_raw(inner.jobs.len() as u64 + 1),
            job_name: request.job_name,
            job_type: request.job_type,
            status: JobStatus::Running,
            started_at: request.started_at,
            completed_at: None,
            error_message: None,
            parameters: request.parameters,
            result_summary: None,
        };
        inner.jobs.push(record.clone());
        Ok(record)
    }

    fn finish_execution(
        &self,
        execution_id: ExecutionId,
        finish: ExecutionFinish,
    ) -> StoreResult<JobExecutionRecord> {
        let mut inner = self.write()?;
        let record = usize::try_from(execution_id.as_u64())
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| inner.jobs.get_mut(index))
            .ok_or_else(|| StoreError::NotFound {
                kind: "Execution",
                id: execution_id.to_string(),
            })?;
        record.status = finish.status;
        record.completed_at = Some(finish.completed_at);
        record.error_message = finish.error_message;
        record.result_summary = finish.result_summary;
        Ok(record.clone())
    }

    fn latest_execution(&self, job_name: &str) -> StoreResult<Option<JobExecutionRecord>> {
        let inner = self.read()?;
        Ok(inner.jobs.iter().rev().find(|r| r.job_name == job_name).cloned())
    }

    fn executions(&self, job_name: &str, limit: usize) -> StoreResult<Vec<JobExecutionRecord>> {
        let inner = self.read()?;
        Ok(inner
            .jobs
            .iter()
            .rev()
            .filter(|r| r.job_name == job_name)
            .take(limit)
            .cloned()
            .collect())
    }

    fn executions_since(
        &self,
        job_name: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<JobExecutionRecord>> {
        let inner = self.read()?;
        Ok(inner
            .jobs
            .iter()
            .rev()
            .filter(|r| r.started_at >= since)
            .filter(|r| job_name.is_none_or(|name| r.job_name == name))
            .cloned()
            .collect())
    }
}

impl ChangeLog for MemoryStore {
    fn tracking(
        &self,
        table_name: &str,
        processing_type: &str,
        snapshot_date: NaiveDate,
    ) -> StoreResult<Option<ChangeTrackingRecord>> {
        let key = tracking_key(table_name, processing_type, snapshot_date);
        Ok(self.read()?.tracking.get(&key).cloned())
    }

    fn record_tracking(&self, record: &ChangeTrackingRecord) -> StoreResult<()> {
        self.write()?.tracking.insert(record.key(), record.clone());
        Ok(())
    }
}

impl Ingest for MemoryStore {
    fn append_sales(&self, rows: &[SalesObservation]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_sales)?;
        let mut inner = self.write()?;
        for row in rows {
            inner.sales.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    fn put_inventory(&self, rows: &[InventoryBatch]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_inventory)?;
        let mut inner = self.write()?;
        for row in rows {
            inner
                .inventory
                .entry(row.snapshot_date)
                .or_default()
                .insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    fn put_skus(&self, rows: &[SkuInfo]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_sku)?;
        let mut inner = self.write()?;
        for row in rows {
            inner.skus.insert(row.sku_id.clone(), row.clone());
        }
        Ok(rows.len())
    }

    fn put_stores(&self, rows: &[StoreInfo]) -> StoreResult<usize> {
        rows.iter().try_for_each(keys::check_store)?;
        let mut inner = self.write()?;
        for row in rows {
            inner.stores.insert(row.store_id.clone(), row.clone());
        }
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sale(day: &str, store: &str, sku: &str, units: i64) -> SalesObservation {
        SalesObservation {
            date: date(day),
            store_id: store.to_string(),
            sku_id: sku.to_string(),
            units_sold: units,
            selling_price: 3.0,
        }
    }

    fn begin(store: &MemoryStore, name: &str, at: DateTime<Utc>) -> StoreResult<JobExecutionRecord> {
        store.begin_execution(NewExecution {
            job_name: name.to_string(),
            job_type: "FEATURE_BUILD".to_string(),
            parameters: serde_json::json!({}),
            started_at: at,
            stale_before: at - Duration::hours(6),
        })
    }

    #[test]
    fn test_sales_range_is_inclusive() {
        let store = MemoryStore::new();
        store
            .append_sales(&[
                sale("2024-02-29", "S1", "A", 1),
                sale("2024-03-01", "S1", "A", 2),
                sale("2024-03-05", "S2", "A", 3),
                sale("2024-03-06", "S1", "A", 4),
            ])
            .unwrap();
        let rows = store
            .sales_between(date("2024-03-01"), date("2024-03-05"))
            .unwrap();
        let units: Vec<i64> = rows.iter().map(|r| r.units_sold).collect();
        assert_eq!(units, vec![2, 3]);
    }

    #[test]
    fn test_sales_upsert_by_key() {
        let store = MemoryStore::new();
        store.append_sales(&[sale("2024-03-01", "S1", "A", 2)]).unwrap();
        store.append_sales(&[sale("2024-03-01", "S1", "A", 7)]).unwrap();
        let rows = store
            .sales_between(date("2024-03-01"), date("2024-03-01"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].units_sold, 7);
    }

    #[test]
    fn test_bad_batch_rejects_whole_write() {
        let store = MemoryStore::new();
        let result = store.append_sales(&[
            sale("2024-03-01", "S1", "A", 2),
            sale("2024-03-01", "S|2", "A", 2),
        ]);
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
        let rows = store
            .sales_between(date("2024-03-01"), date("2024-03-01"))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_begin_execution_conflict() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = begin(&store, "nightly_feature_build", now).unwrap();
        assert_eq!(first.status, JobStatus::Running);

        let second = begin(&store, "nightly_feature_build", now);
        assert_eq!(
            second,
            Err(StoreError::Conflict {
                job_name: "nightly_feature_build".to_string()
            })
        );

        // Different job names do not conflict
        assert!(begin(&store, "nightly_risk_scoring", now).is_ok());
    }

    #[test]
    fn test_stale_running_execution_is_abandoned() {
        let store = MemoryStore::new();
        let then = Utc::now() - Duration::hours(7);
        let stale = begin(&store, "nightly_feature_build", then).unwrap();

        let fresh = begin(&store, "nightly_feature_build", Utc::now()).unwrap();
        assert_eq!(fresh.execution_id, stale.execution_id.next());

        let history = store.executions("nightly_feature_build", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, JobStatus::Failed);
        assert_eq!(history[1].error_message.as_deref(), Some(ABANDONED_MESSAGE));
    }

    #[test]
    fn test_finish_and_history_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            let record = begin(&store, "job", now).unwrap();
            store
                .finish_execution(
                    record.execution_id,
                    ExecutionFinish {
                        status: JobStatus::Succeeded,
                        completed_at: now,
                        error_message: None,
                        result_summary: None,
                    },
                )
                .unwrap();
        }
        let history = store.executions("job", 2).unwrap();
        let ids: Vec<u64> = history.iter().map(|r| r.execution_id.as_u64()).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(
            store.latest_execution("job").unwrap().map(|r| r.execution_id.as_u64()),
            Some(3)
        );
        assert!(store.latest_execution("other").unwrap().is_none());
    }

    #[test]
    fn test_finish_unknown_execution() {
        let store = MemoryStore::new();
        let result = store.finish_execution(
            ExecutionId::from_raw(0),
            ExecutionFinish {
                status: JobStatus::Failed,
                completed_at: Utc::now(),
                error_message: None,
                result_summary: None,
            },
        );
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_feature_upsert_rejects_foreign_date() {
        let store = MemoryStore::new();
        let row = VelocityFeature {
            date: date("2024-03-02"),
            store_id: "S1".to_string(),
            sku_id: "A".to_string(),
            v7: 1.0,
            v14: 1.0,
            v30: 1.0,
            volatility: 0.0,
            history_days: 1,
        };
        assert!(store.upsert_features(date("2024-03-01"), &[row.clone()]).is_err());
        assert_eq!(store.upsert_features(date("2024-03-02"), &[row]).unwrap(), 1);
        assert_eq!(store.features_at(date("2024-03-02")).unwrap().len(), 1);
    }

    #[test]
    fn test_feature_upsert_replaces_date() {
        let store = MemoryStore::new();
        let d = date("2024-03-02");
        let row = |store_id: &str| VelocityFeature {
            date: d,
            store_id: store_id.to_string(),
            sku_id: "A".to_string(),
            v7: 1.0,
            v14: 1.0,
            v30: 1.0,
            volatility: 0.0,
            history_days: 1,
        };
        store.upsert_features(d, &[row("S1"), row("S2")]).unwrap();
        store.upsert_features(d, &[row("S2"), row("S2")]).unwrap();
        let rows = store.features_at(d).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].store_id, "S2");
    }
}
