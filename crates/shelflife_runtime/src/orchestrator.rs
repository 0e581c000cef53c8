//! Job orchestrator.
//!
//! Runs registered jobs stage by stage, records every run in the execution
//! log, retries failed stage attempts and honours cancellation between
//! stages. `run_job` always returns a [`JobOutcome`]; it never propagates
//! an error.

use crate::job::{JobDefinition, JobParameters, JobRegistry};
use crate::monitor::{JobStatistics, SystemHealth};
use crate::retry::{self, Attempted};
use crate::stage::{Stage, StageContext, StageReport, StageRunner};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use shelflife_core::{
    FeatureConfig, JobExecutionRecord, JobStatus, PipelineConfig, PipelineError, PipelineResult,
};
use shelflife_storage::{ExecutionFinish, NewExecution, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Structured result of a job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Whether every stage succeeded
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Stage data
    pub data: Value,
    /// Failure description
    pub error: Option<String>,
    /// Retries across all stages
    pub retry_count: u32,
    /// Wall-clock time of the run
    pub execution_time_seconds: f64,
}

impl JobOutcome {
    fn rejected(message: String, started: Instant) -> Self {
        Self {
            success: false,
            message: message.clone(),
            data: Value::Null,
            error: Some(message),
            retry_count: 0,
            execution_time_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

/// Lifecycle state of a job, derived from its latest execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Never executed
    Idle,
    /// An execution is in progress
    Running,
    /// Last execution succeeded
    Succeeded,
    /// Last execution failed
    Failed,
}

impl JobState {
    /// State implied by the latest execution
    #[must_use]
    pub fn from_latest(latest: Option<&JobExecutionRecord>) -> Self {
        match latest.map(|r| r.status) {
            None => Self::Idle,
            Some(JobStatus::Running) => Self::Running,
            Some(JobStatus::Succeeded) => Self::Succeeded,
            Some(JobStatus::Failed) => Self::Failed,
        }
    }
}

/// Definition, state and latest execution of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Definition
    pub definition: JobDefinition,
    /// Derived state
    pub state: JobState,
    /// Latest execution
    pub latest: Option<JobExecutionRecord>,
}

/// Execution record with its duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Record
    #[serde(flatten)]
    pub record: JobExecutionRecord,
    /// Seconds from start to completion
    pub duration_seconds: Option<f64>,
}

/// Stage progress of one run
#[derive(Debug, Default)]
struct RunProgress {
    reports: Vec<StageReport>,
    retries: u32,
    failure: Option<(Stage, u32, PipelineError)>,
}

impl RunProgress {
    fn data(&self, snapshot_date: chrono::NaiveDate) -> Value {
        let mut data = Map::new();
        data.insert("snapshot_date".to_string(), json!(snapshot_date));
        data.insert("stages".to_string(), json!(self.reports));
        if let Some((stage, _, _)) = &self.failure {
            data.insert("failed_stage".to_string(), json!(stage));
        }
        Value::Object(data)
    }

    fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(|(_, attempts, err)| match err {
            PipelineError::Cancelled { .. } => err.to_string(),
            _ => format!("Failed after {} attempts. Last error: {}", attempts, err),
        })
    }
}

async fn blocking<T, F>(f: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            if e.is_panic() {
                PipelineError::Panicked {
                    message: e.to_string(),
                }
            } else {
                PipelineError::Computation {
                    key: "blocking task".to_string(),
                    reason: e.to_string(),
                }
            }
        })?
}

/// Runs registered jobs against a store
pub struct Orchestrator<S: ?Sized> {
    store: Arc<S>,
    config: PipelineConfig,
    registry: RwLock<JobRegistry>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl<S: Store + ?Sized + 'static> Orchestrator<S> {
    /// Create an orchestrator with the default nightly jobs
    #[must_use]
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        let registry = JobRegistry::with_defaults(&config.retry);
        Self::with_registry(store, config, registry)
    }

    /// Create an orchestrator with an explicit registry
    #[must_use]
    pub fn with_registry(store: Arc<S>, config: PipelineConfig, registry: JobRegistry) -> Self {
        Self {
            store,
            config,
            registry: RwLock::new(registry),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registered jobs in registration order
    pub async fn list_jobs(&self) -> Vec<JobDefinition> {
        self.registry.read().await.iter().cloned().collect()
    }

    /// Enable or disable a job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job
    pub async fn set_job_enabled(&self, job_name: &str, enabled: bool) -> PipelineResult<()> {
        self.registry.write().await.set_enabled(job_name, enabled)?;
        tracing::info!(job_name, enabled, "job toggled");
        Ok(())
    }

    async fn definition(&self, job_name: &str) -> PipelineResult<JobDefinition> {
        self.registry
            .read()
            .await
            .get(job_name)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound {
                kind: "Job".to_string(),
                id: job_name.to_string(),
            })
    }

    fn context(&self, params: &JobParameters) -> PipelineResult<StageContext> {
        let window_days = params
            .window_days
            .unwrap_or(self.config.features.window_days);
        FeatureConfig::check_window("window_days", window_days)?;
        Ok(StageContext {
            snapshot_date: params
                .snapshot_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            window_days,
            action_request: params.action_request(self.config.actions.min_risk_score),
            incremental: params
                .incremental
                .unwrap_or(self.config.orchestrator.incremental),
        })
    }

    /// Run a job to completion
    ///
    /// Unknown or disabled jobs, invalid parameters and a concurrent run of
    /// the same job yield a failed outcome without executing anything.
    pub async fn run_job(&self, job_name: &str, overrides: Option<JobParameters>) -> JobOutcome {
        let started = Instant::now();
        let definition = match self.definition(job_name).await {
            Ok(def) if def.enabled => def,
            Ok(_) => return JobOutcome::rejected(format!("Job '{}' is disabled", job_name), started),
            Err(err) => return JobOutcome::rejected(err.to_string(), started),
        };

        let mut params = definition.parameters.merged(overrides.as_ref());
        let ctx = match self.context(&params) {
            Ok(ctx) => ctx,
            Err(err) => return JobOutcome::rejected(err.to_string(), started),
        };
        params.snapshot_date = Some(ctx.snapshot_date);
        params.window_days = Some(ctx.window_days);
        params.incremental = Some(ctx.incremental);

        let execution = match self.begin(&definition, &params).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(job_name, error = %err, "job not started");
                return JobOutcome::rejected(err.to_string(), started);
            }
        };
        tracing::info!(
            job_name,
            execution_id = %execution.execution_id,
            snapshot_date = %ctx.snapshot_date,
            "job started"
        );

        let token = CancellationToken::new();
        if let Ok(mut running) = self.running.lock() {
            running.insert(job_name.to_string(), token.clone());
        }
        let progress = self.run_stages(&definition, &ctx, &token).await;
        if let Ok(mut running) = self.running.lock() {
            running.remove(job_name);
        }

        let execution_time_seconds = started.elapsed().as_secs_f64();
        let mut data = progress.data(ctx.snapshot_date);
        if let Value::Object(map) = &mut data {
            map.insert("retry_count".to_string(), json!(progress.retries));
            map.insert(
                "execution_time_seconds".to_string(),
                json!(execution_time_seconds),
            );
        }
        let error = progress.error_message();
        let success = error.is_none();

        let finish = ExecutionFinish {
            status: if success {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            },
            completed_at: Utc::now(),
            error_message: error.clone(),
            result_summary: Some(data.clone()),
        };
        let store = Arc::clone(&self.store);
        let id = execution.execution_id;
        if let Err(err) = blocking(move || Ok(store.finish_execution(id, finish)?)).await {
            tracing::error!(job_name, execution_id = %id, error = %err, "failed to close execution");
        }

        let message = if success {
            let stages: Vec<String> = progress
                .reports
                .iter()
                .map(|r| format!("{}={}", r.stage, r.status))
                .collect();
            format!("Job '{}' completed: {}", job_name, stages.join(", "))
        } else {
            format!("Job '{}' failed", job_name)
        };
        if success {
            tracing::info!(job_name, execution_time_seconds, retries = progress.retries, "job succeeded");
        } else {
            tracing::error!(job_name, error = error.as_deref().unwrap_or_default(), "job failed");
        }

        JobOutcome {
            success,
            message,
            data,
            error,
            retry_count: progress.retries,
            execution_time_seconds,
        }
    }

    async fn begin(
        &self,
        definition: &JobDefinition,
        params: &JobParameters,
    ) -> PipelineResult<JobExecutionRecord> {
        let now = Utc::now();
        let stale_secs = i64::try_from(self.config.orchestrator.stale_running_after_secs)
            .unwrap_or(i64::MAX);
        let request = NewExecution {
            job_name: definition.name.clone(),
            job_type: definition.kind.as_str().to_string(),
            parameters: serde_json::to_value(params)?,
            started_at: now,
            stale_before: now
                .checked_sub_signed(Duration::seconds(stale_secs))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };
        let store = Arc::clone(&self.store);
        blocking(move || Ok(store.begin_execution(request)?)).await
    }

    async fn run_stages(
        &self,
        definition: &JobDefinition,
        ctx: &StageContext,
        token: &CancellationToken,
    ) -> RunProgress {
        let mut progress = RunProgress::default();
        let runner = StageRunner::new(Arc::clone(&self.store), self.config.clone());

        for &stage in definition.kind.stages() {
            if token.is_cancelled() {
                tracing::warn!(job_name = %definition.name, %stage, "cancelled");
                progress.failure = Some((
                    stage,
                    0,
                    PipelineError::Cancelled {
                        stage: stage.as_str().to_string(),
                    },
                ));
                break;
            }

            let attempted: Attempted<StageReport> =
                retry::retry(&definition.retry, token, stage.as_str(), || {
                    let runner = runner.clone();
                    let ctx = ctx.clone();
                    blocking(move || runner.run(stage, &ctx))
                })
                .await;
            progress.retries += attempted.retries();
            match attempted.result {
                Ok(report) => progress.reports.push(report),
                Err(err) => {
                    tracing::error!(
                        job_name = %definition.name,
                        %stage,
                        attempts = attempted.attempts,
                        error = %err,
                        "stage failed"
                    );
                    progress.failure = Some((stage, attempted.attempts, err));
                    break;
                }
            }
        }
        progress
    }

    /// Request cancellation of a running job
    ///
    /// Returns `false` if the job is not running in this process.
    pub fn cancel_job(&self, job_name: &str) -> bool {
        let Ok(running) = self.running.lock() else {
            return false;
        };
        match running.get(job_name) {
            Some(token) => {
                token.cancel();
                tracing::info!(job_name, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Definition, derived state and latest execution of a job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job
    pub async fn get_job_status(&self, job_name: &str) -> PipelineResult<JobStatusReport> {
        let definition = self.definition(job_name).await?;
        let store = Arc::clone(&self.store);
        let name = job_name.to_string();
        let latest = blocking(move || Ok(store.latest_execution(&name)?)).await?;
        Ok(JobStatusReport {
            definition,
            state: JobState::from_latest(latest.as_ref()),
            latest,
        })
    }

    /// Up to `limit` executions of a job, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the execution log cannot be read
    pub async fn get_job_history(
        &self,
        job_name: &str,
        limit: usize,
    ) -> PipelineResult<Vec<HistoryEntry>> {
        let store = Arc::clone(&self.store);
        let name = job_name.to_string();
        let records = blocking(move || Ok(store.executions(&name, limit)?)).await?;
        Ok(records
            .into_iter()
            .map(|record| HistoryEntry {
                duration_seconds: record.duration_seconds(),
                record,
            })
            .collect())
    }

    /// Aggregate of a job's executions over the last `days` days
    ///
    /// # Errors
    ///
    /// Returns error if the execution log cannot be read
    pub async fn get_job_statistics(
        &self,
        job_name: &str,
        days: u32,
    ) -> PipelineResult<JobStatistics> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let store = Arc::clone(&self.store);
        let name = job_name.to_string();
        let records = blocking(move || Ok(store.executions_since(Some(&name), since)?)).await?;
        Ok(JobStatistics::from_records(job_name, days, &records))
    }

    /// Pipeline-wide health over the configured window
    ///
    /// # Errors
    ///
    /// Returns error if the execution log cannot be read
    pub async fn system_health(&self) -> PipelineResult<SystemHealth> {
        let window_hours = self.config.orchestrator.health_window_hours;
        let now = Utc::now();
        let since = now - Duration::hours(i64::from(window_hours));
        let store = Arc::clone(&self.store);
        let records = blocking(move || Ok(store.executions_since(None, since)?)).await?;
        let (registered, enabled) = {
            let registry = self.registry.read().await;
            (registry.len(), registry.enabled_count())
        };
        Ok(SystemHealth::from_records(
            window_hours,
            now,
            &records,
            registered,
            enabled,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FEATURE_BUILD_JOB, FULL_PROCESSING_JOB, RISK_SCORING_JOB};
    use shelflife_storage::MemoryStore;

    fn orchestrator() -> Orchestrator<MemoryStore> {
        Orchestrator::new(Arc::new(MemoryStore::new()), PipelineConfig::default())
    }

    fn on(date: &str) -> Option<JobParameters> {
        Some(JobParameters {
            snapshot_date: Some(date.parse().unwrap()),
            ..JobParameters::default()
        })
    }

    #[tokio::test]
    async fn test_unknown_job_fails_without_record() {
        let orch = orchestrator();
        let outcome = orch.run_job("missing", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Job not found: missing"));
        assert!(orch.get_job_history("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_job_refused() {
        let orch = orchestrator();
        orch.set_job_enabled(RISK_SCORING_JOB, false).await.unwrap();
        let outcome = orch.run_job(RISK_SCORING_JOB, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("disabled"));
        let status = orch.get_job_status(RISK_SCORING_JOB).await.unwrap();
        assert_eq!(status.state, JobState::Idle);
    }

    #[tokio::test]
    async fn test_zero_window_rejected() {
        let orch = orchestrator();
        let params = JobParameters {
            window_days: Some(0),
            ..JobParameters::default()
        };
        let outcome = orch.run_job(FEATURE_BUILD_JOB, Some(params)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("window_days"));
    }

    #[tokio::test]
    async fn test_oversized_window_rejected_before_running() {
        let orch = orchestrator();
        let params = JobParameters {
            window_days: Some(u32::MAX),
            ..JobParameters::default()
        };
        let outcome = orch.run_job(FEATURE_BUILD_JOB, Some(params)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.retry_count, 0);
        assert!(outcome.error.unwrap().contains("at most 3650"));
        assert!(orch.get_job_history(FEATURE_BUILD_JOB, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocking_panic_is_not_retryable() {
        let err = blocking::<(), _>(|| panic!("overflowed")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Panicked { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("overflowed"));
    }

    #[tokio::test]
    async fn test_empty_store_runs_as_no_data() {
        let orch = orchestrator();
        let outcome = orch.run_job(FULL_PROCESSING_JOB, on("2024-03-10")).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.retry_count, 0);
        let stages = outcome.data["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 3);
        assert!(stages.iter().all(|s| s["status"] == "no_data"));

        let status = orch.get_job_status(FULL_PROCESSING_JOB).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        let latest = status.latest.unwrap();
        assert_eq!(latest.parameters["snapshot_date"], "2024-03-10");
        assert_eq!(latest.result_summary.unwrap()["retry_count"], 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_false() {
        let orch = orchestrator();
        assert!(!orch.cancel_job(FULL_PROCESSING_JOB));
    }

    #[tokio::test]
    async fn test_list_jobs_in_order() {
        let orch = orchestrator();
        let jobs = orch.list_jobs().await;
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[0].name, FEATURE_BUILD_JOB);
        assert_eq!(jobs[3].name, FULL_PROCESSING_JOB);
    }

    #[test]
    fn test_state_from_latest() {
        assert_eq!(JobState::from_latest(None), JobState::Idle);
    }
}
