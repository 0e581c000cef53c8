//! Job statistics and system health.
//!
//! Both reports are derived from the execution log on demand.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shelflife_core::{JobExecutionRecord, JobStatus};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Execution counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Executions seen
    pub total: u64,
    /// Finished successfully
    pub succeeded: u64,
    /// Finished with an error
    pub failed: u64,
    /// Still running
    pub running: u64,
}

impl Tally {
    /// Count one execution
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Running => self.running += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    /// Percentage of executions that succeeded, 0 when empty
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round2(self.succeeded as f64 / self.total as f64 * 100.0)
    }
}

/// Most recent execution in a statistics window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastExecution {
    /// Status
    pub status: JobStatus,
    /// Start instant
    pub started_at: DateTime<Utc>,
    /// Completion instant
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure description
    pub error_message: Option<String>,
}

/// Aggregate over one job's executions in a trailing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Job name
    pub job_name: String,
    /// Period length in days
    pub period_days: u32,
    /// Executions started in the period
    pub total_executions: u64,
    /// Succeeded executions
    pub successful_executions: u64,
    /// Failed executions
    pub failed_executions: u64,
    /// Succeeded share in percent, two decimals
    pub success_rate: f64,
    /// Mean duration of succeeded executions, two decimals
    pub average_duration_seconds: f64,
    /// Sum of retries over the period
    pub total_retries: u64,
    /// Newest execution
    pub last_execution: Option<LastExecution>,
}

impl JobStatistics {
    /// Aggregate records ordered newest first
    #[must_use]
    pub fn from_records(job_name: &str, period_days: u32, records: &[JobExecutionRecord]) -> Self {
        let mut tally = Tally::default();
        let mut durations = Vec::new();
        let mut total_retries = 0;
        for record in records {
            tally.record(record.status);
            total_retries += record.retry_count();
            if record.status == JobStatus::Succeeded {
                durations.extend(record.duration_seconds());
            }
        }
        let average_duration_seconds = if durations.is_empty() {
            0.0
        } else {
            round2(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        Self {
            job_name: job_name.to_string(),
            period_days,
            total_executions: tally.total,
            successful_executions: tally.succeeded,
            failed_executions: tally.failed,
            success_rate: tally.success_rate(),
            average_duration_seconds,
            total_retries,
            last_execution: records.first().map(|r| LastExecution {
                status: r.status,
                started_at: r.started_at,
                completed_at: r.completed_at,
                error_message: r.error_message.clone(),
            }),
        }
    }
}

/// Pipeline-wide health over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Window length in hours
    pub window_hours: u32,
    /// Report instant
    pub generated_at: DateTime<Utc>,
    /// Executions started in the window
    pub total_executions: u64,
    /// Succeeded executions
    pub successful_executions: u64,
    /// Failed executions
    pub failed_executions: u64,
    /// Executions currently RUNNING
    pub running_executions: u64,
    /// Succeeded share in percent, two decimals
    pub success_rate: f64,
    /// Counts per job type, in first-seen order
    pub by_job_type: IndexMap<String, Tally>,
    /// Registered jobs
    pub registered_jobs: usize,
    /// Enabled jobs
    pub enabled_jobs: usize,
}

impl SystemHealth {
    /// Aggregate records ordered newest first
    #[must_use]
    pub fn from_records(
        window_hours: u32,
        generated_at: DateTime<Utc>,
        records: &[JobExecutionRecord],
        registered_jobs: usize,
        enabled_jobs: usize,
    ) -> Self {
        let mut overall = Tally::default();
        let mut by_job_type: IndexMap<String, Tally> = IndexMap::new();
        for record in records {
            overall.record(record.status);
            by_job_type
                .entry(record.job_type.clone())
                .or_default()
                .record(record.status);
        }
        Self {
            window_hours,
            generated_at,
            total_executions: overall.total,
            successful_executions: overall.succeeded,
            failed_executions: overall.failed,
            running_executions: overall.running,
            success_rate: overall.success_rate(),
            by_job_type,
            registered_jobs,
            enabled_jobs,
        }
    }
}
