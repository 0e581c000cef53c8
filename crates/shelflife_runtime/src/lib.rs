//! SHELFLIFE Runtime
//!
//! Job orchestration for the nightly pipeline: the job registry, stage
//! runners with change detection, retry with backoff, cancellation, and
//! statistics over the execution log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod job;
pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod stage;

pub use change::{ChangeDecision, InputDigest};
pub use job::{
    ACTION_GENERATION_JOB, FEATURE_BUILD_JOB, FULL_PROCESSING_JOB, JobDefinition, JobKind,
    JobParameters, JobRegistry, RISK_SCORING_JOB,
};
pub use monitor::{JobStatistics, LastExecution, SystemHealth, Tally};
pub use orchestrator::{HistoryEntry, JobOutcome, JobState, JobStatusReport, Orchestrator};
pub use retry::{Attempted, backoff_delay, delay_for};
pub use stage::{Stage, StageContext, StageReport, StageRunner};
