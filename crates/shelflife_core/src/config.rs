//! Pipeline configuration.
//!
//! Every section has defaults; a TOML file only needs to name the values it
//! overrides.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted trailing window, in days
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// Feature engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing window length in days
    pub window_days: u32,
    /// Compute pairs on the rayon pool
    pub parallel: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            parallel: true,
        }
    }
}

impl FeatureConfig {
    /// Check a trailing window length
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `1 <= days <= MAX_WINDOW_DAYS`
    pub fn check_window(field: &str, days: u32) -> PipelineResult<()> {
        if days == 0 {
            return Err(PipelineError::validation(field, "must be at least 1"));
        }
        if days > MAX_WINDOW_DAYS {
            return Err(PipelineError::validation(
                field,
                format!("must be at most {}", MAX_WINDOW_DAYS),
            ));
        }
        Ok(())
    }
}

/// Risk scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Weight of the at-risk ratio term
    pub ratio_weight: f64,
    /// Weight of the expiry urgency term
    pub urgency_weight: f64,
    /// Saturation steepness of the ratio term
    pub ratio_steepness: f64,
    /// Decay constant of the urgency term, in days
    pub urgency_decay_days: f64,
    /// Minimum score for an expired batch with stock at risk
    pub expired_floor: f64,
    /// Price used when neither catalog nor sales provide one (0 disables)
    pub default_price: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            ratio_weight: 0.7,
            urgency_weight: 0.3,
            ratio_steepness: 3.0,
            urgency_decay_days: 7.0,
            expired_floor: 95.0,
            default_price: 10.0,
        }
    }
}

impl RiskConfig {
    /// Check weights and curve constants
    ///
    /// # Errors
    ///
    /// Returns a validation error for negative weights, weights summing past 1,
    /// or non-positive curve constants
    pub fn validate(&self) -> PipelineResult<()> {
        if self.ratio_weight < 0.0 || self.urgency_weight < 0.0 {
            return Err(PipelineError::validation("risk.weights", "must not be negative"));
        }
        if self.ratio_weight + self.urgency_weight > 1.0 + f64::EPSILON {
            return Err(PipelineError::validation("risk.weights", "must sum to at most 1"));
        }
        if self.ratio_steepness <= 0.0 {
            return Err(PipelineError::validation("risk.ratio_steepness", "must be positive"));
        }
        if self.urgency_decay_days <= 0.0 {
            return Err(PipelineError::validation("risk.urgency_decay_days", "must be positive"));
        }
        if !(0.0..=100.0).contains(&self.expired_floor) {
            return Err(PipelineError::validation("risk.expired_floor", "must be within 0..=100"));
        }
        if self.default_price < 0.0 {
            return Err(PipelineError::validation("risk.default_price", "must not be negative"));
        }
        Ok(())
    }
}

/// Action recommendation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Risk rows below this score are ignored
    pub min_risk_score: f64,
    /// Days a transfer takes to land
    pub transfer_lead_days: i64,
    /// Destination v14 must exceed source v14 by this factor
    pub velocity_ratio: f64,
    /// Transport cost per unit
    pub transfer_cost_per_unit: f64,
    /// Cost multiplier for transfers across regions
    pub cross_region_factor: f64,
    /// Maximum transfer destinations proposed per batch
    pub max_transfer_destinations: usize,
    /// Upper bound on markdown discount, as a fraction
    pub max_discount: f64,
    /// Sell-through gained per unit of discount
    pub markdown_elasticity: f64,
    /// Liquidation is considered at or below this many days to expiry
    pub critical_days: i64,
    /// Fixed handling fee of a liquidation
    pub liquidation_fixed_fee: f64,
    /// Per-unit handling cost of a liquidation before the category multiplier
    pub liquidation_unit_handling: f64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            min_risk_score: 50.0,
            transfer_lead_days: 1,
            velocity_ratio: 1.2,
            transfer_cost_per_unit: 2.0,
            cross_region_factor: 1.5,
            max_transfer_destinations: 3,
            max_discount: 0.7,
            markdown_elasticity: 2.5,
            critical_days: 3,
            liquidation_fixed_fee: 50.0,
            liquidation_unit_handling: 1.0,
        }
    }
}

impl ActionConfig {
    /// Check policy knobs
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range values
    pub fn validate(&self) -> PipelineResult<()> {
        if !(0.0..=100.0).contains(&self.min_risk_score) {
            return Err(PipelineError::validation("actions.min_risk_score", "must be within 0..=100"));
        }
        if !(0.0..1.0).contains(&self.max_discount) {
            return Err(PipelineError::validation("actions.max_discount", "must be within 0..1"));
        }
        if self.velocity_ratio < 1.0 {
            return Err(PipelineError::validation("actions.velocity_ratio", "must be at least 1"));
        }
        if self.transfer_lead_days < 0 || self.critical_days < 0 {
            return Err(PipelineError::validation("actions.days", "must not be negative"));
        }
        Ok(())
    }
}

/// Backoff policy for failed stage attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, in seconds
    pub base_delay_secs: f64,
    /// Upper bound on any delay, in seconds
    pub max_delay_secs: f64,
    /// Growth factor between retries
    pub exponential_base: f64,
    /// Apply +/-10% jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 60.0,
            max_delay_secs: 3600.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set retry count
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_secs = delay.as_secs_f64();
        self
    }

    /// Check delay bounds
    ///
    /// # Errors
    ///
    /// Returns a validation error for negative delays or a shrinking base
    pub fn validate(&self) -> PipelineResult<()> {
        if self.base_delay_secs < 0.0 || self.max_delay_secs < 0.0 {
            return Err(PipelineError::validation("retry.delay", "must not be negative"));
        }
        if self.exponential_base < 1.0 {
            return Err(PipelineError::validation("retry.exponential_base", "must be at least 1"));
        }
        Ok(())
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// A RUNNING record older than this is treated as abandoned
    pub stale_running_after_secs: u64,
    /// Lookback of the system health report
    pub health_window_hours: u32,
    /// Skip stages whose inputs are unchanged
    pub incremental: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stale_running_after_secs: 6 * 60 * 60,
            health_window_hours: 24,
            incremental: true,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feature engine
    pub features: FeatureConfig,
    /// Risk engine
    pub risk: RiskConfig,
    /// Action engine
    pub actions: ActionConfig,
    /// Default retry policy for registered jobs
    pub retry: RetryPolicy,
    /// Orchestrator
    pub orchestrator: OrchestratorConfig,
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PipelineError::validation("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::validation("config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first validation failure
    pub fn validate(&self) -> PipelineResult<()> {
        FeatureConfig::check_window("features.window_days", self.features.window_days)?;
        self.risk.validate()?;
        self.actions.validate()?;
        self.retry.validate()
    }
}
