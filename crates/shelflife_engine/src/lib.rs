//! SHELFLIFE Engines
//!
//! The three nightly stages: velocity features from sales, expiry risk
//! per inventory batch, and ranked mitigation proposals.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod features;
pub mod pricing;
pub mod risk;
pub mod summary;

pub use actions::{ActionEngine, ActionPreferences, ActionRequest, ActionTotals, OptimizeFor};
pub use features::{FeatureEngine, Velocity};
pub use pricing::PriceBook;
pub use risk::{RiskEngine, risk_score};
pub use summary::{FeatureRunSummary, RiskRunSummary, StageStatus};
