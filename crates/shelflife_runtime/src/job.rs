//! Job definitions and the registry.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shelflife_core::{PipelineError, PipelineResult, RetryPolicy};
use shelflife_engine::{ActionPreferences, ActionRequest};
use std::fmt;

use crate::stage::Stage;

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Feature build only
    FeatureBuild,
    /// Risk scoring only
    RiskScoring,
    /// Action generation only
    ActionGeneration,
    /// Features, risk and actions in sequence
    NightlyProcessing,
}

impl JobKind {
    /// Stable name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureBuild => "FEATURE_BUILD",
            Self::RiskScoring => "RISK_SCORING",
            Self::ActionGeneration => "ACTION_GENERATION",
            Self::NightlyProcessing => "NIGHTLY_PROCESSING",
        }
    }

    /// Stages run by this kind, in order
    #[must_use]
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Self::FeatureBuild => &[Stage::Features],
            Self::RiskScoring => &[Stage::RiskScoring],
            Self::ActionGeneration => &[Stage::ActionGeneration],
            Self::NightlyProcessing => &[Stage::Features, Stage::RiskScoring, Stage::ActionGeneration],
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a run; unset fields fall back to the job's defaults, then to configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParameters {
    /// Snapshot date; defaults to today (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_date: Option<NaiveDate>,
    /// Trailing window length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
    /// Minimum risk score for action generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_risk_score: Option<f64>,
    /// Propose transfers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_transfers: Option<bool>,
    /// Propose markdowns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_markdowns: Option<bool>,
    /// Propose liquidations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_liquidations: Option<bool>,
    /// Action preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<ActionPreferences>,
    /// Skip stages whose inputs are unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

impl JobParameters {
    /// Overlay `overrides` on top of `self`
    #[must_use]
    pub fn merged(&self, overrides: Option<&JobParameters>) -> Self {
        let Some(o) = overrides else {
            return self.clone();
        };
        Self {
            snapshot_date: o.snapshot_date.or(self.snapshot_date),
            window_days: o.window_days.or(self.window_days),
            min_risk_score: o.min_risk_score.or(self.min_risk_score),
            include_transfers: o.include_transfers.or(self.include_transfers),
            include_markdowns: o.include_markdowns.or(self.include_markdowns),
            include_liquidations: o.include_liquidations.or(self.include_liquidations),
            preferences: o.preferences.clone().or_else(|| self.preferences.clone()),
            incremental: o.incremental.or(self.incremental),
        }
    }

    /// Action request with `default_min_risk_score` when unset
    #[must_use]
    pub fn action_request(&self, default_min_risk_score: f64) -> ActionRequest {
        ActionRequest {
            min_risk_score: self.min_risk_score.unwrap_or(default_min_risk_score),
            include_transfers: self.include_transfers.unwrap_or(true),
            include_markdowns: self.include_markdowns.unwrap_or(true),
            include_liquidations: self.include_liquidations.unwrap_or(true),
            preferences: self.preferences.clone(),
        }
    }
}

/// A named, schedulable job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique name
    pub name: String,
    /// Kind
    pub kind: JobKind,
    /// Human-readable description
    pub description: String,
    /// Disabled jobs refuse to run
    pub enabled: bool,
    /// Default parameters
    pub parameters: JobParameters,
    /// Backoff policy for failed stage attempts
    pub retry: RetryPolicy,
}

impl JobDefinition {
    /// Create an enabled job with empty parameters
    #[must_use]
    pub fn new(name: impl Into<String>, kind: JobKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            enabled: true,
            parameters: JobParameters::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set default parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: JobParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Name of the feature build job
pub const FEATURE_BUILD_JOB: &str = "nightly_feature_build";
/// Name of the risk scoring job
pub const RISK_SCORING_JOB: &str = "nightly_risk_scoring";
/// Name of the action generation job
pub const ACTION_GENERATION_JOB: &str = "nightly_action_generation";
/// Name of the full pipeline job
pub const FULL_PROCESSING_JOB: &str = "nightly_full_processing";

/// Registered jobs in registration order
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: IndexMap<String, JobDefinition>,
}

impl JobRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four nightly jobs
    #[must_use]
    pub fn with_defaults(retry: &RetryPolicy) -> Self {
        let mut registry = Self::new();
        let jobs = [
            JobDefinition::new(
                FEATURE_BUILD_JOB,
                JobKind::FeatureBuild,
                "Build sales velocity features",
            )
            .with_parameters(JobParameters {
                window_days: Some(30),
                ..JobParameters::default()
            }),
            JobDefinition::new(
                RISK_SCORING_JOB,
                JobKind::RiskScoring,
                "Score expiry risk for inventory batches",
            ),
            JobDefinition::new(
                ACTION_GENERATION_JOB,
                JobKind::ActionGeneration,
                "Generate ranked mitigation proposals",
            )
            .with_parameters(JobParameters {
                min_risk_score: Some(50.0),
                ..JobParameters::default()
            }),
            JobDefinition::new(
                FULL_PROCESSING_JOB,
                JobKind::NightlyProcessing,
                "Run features, risk scoring and action generation in sequence",
            ),
        ];
        for job in jobs {
            // names are distinct
            let _ = registry.register(job.with_retry(retry.clone()));
        }
        registry
    }

    /// Register a job
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken or contains the key separator
    pub fn register(&mut self, job: JobDefinition) -> PipelineResult<()> {
        if job.name.is_empty() || job.name.contains('|') {
            return Err(PipelineError::validation("job.name", "must be non-empty without '|'"));
        }
        if self.jobs.contains_key(&job.name) {
            return Err(PipelineError::validation(
                "job.name",
                format!("'{}' is already registered", job.name),
            ));
        }
        self.jobs.insert(job.name.clone(), job);
        Ok(())
    }

    /// Look up a job
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    /// Enable or disable a job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> PipelineResult<()> {
        let job = self.jobs.get_mut(name).ok_or_else(|| PipelineError::NotFound {
            kind: "Job".to_string(),
            id: name.to_string(),
        })?;
        job.enabled = enabled;
        Ok(())
    }

    /// Jobs in registration order
    pub fn iter(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.values()
    }

    /// Number of registered jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if no jobs are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of enabled jobs
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.jobs.values().filter(|j| j.enabled).count()
    }
}
