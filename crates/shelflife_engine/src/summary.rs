//! Run summaries returned by the engines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one stage for one snapshot date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Output was computed and written
    Success,
    /// No input rows existed; nothing was written
    NoData,
    /// Inputs unchanged since the last successful run
    Skipped,
}

impl StageStatus {
    /// Stable name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a feature build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRunSummary {
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// Outcome
    pub status: StageStatus,
    /// Rows written
    pub features_created: usize,
    /// Pairs that failed to compute
    pub errors: usize,
}

/// Result of a risk scoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRunSummary {
    /// Snapshot date
    pub snapshot_date: NaiveDate,
    /// Outcome
    pub status: StageStatus,
    /// Rows written
    pub batches_scored: usize,
    /// Batches that failed to score
    pub errors: usize,
    /// Sum of at-risk value over scored batches
    pub total_at_risk_value: f64,
}
