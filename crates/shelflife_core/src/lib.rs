//! SHELFLIFE Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Records, the error taxonomy, content hashing, date windows and
//! pipeline configuration all live here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod model;
pub mod time;

// Re-exports
pub use config::{
    ActionConfig, FeatureConfig, MAX_WINDOW_DAYS, OrchestratorConfig, PipelineConfig, RetryPolicy,
    RiskConfig,
};
pub use error::{PipelineError, PipelineResult};
pub use hash::{ContentHasher, Hash};
pub use id::{ActionId, ExecutionId};
pub use model::{
    ActionProposal, ActionStatus, ActionType, BatchRisk, ChangeTrackingRecord, InventoryBatch,
    JobExecutionRecord, JobStatus, SalesObservation, SkuInfo, StoreInfo, VelocityFeature,
};
pub use time::DateWindow;
