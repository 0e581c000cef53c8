//! SHELFLIFE Storage
//!
//! Storage traits for source rows, derived analytics, the job execution
//! log and change tracking, with an in-memory and a redb backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod persistent;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use persistent::RedbStore;
pub use traits::{
    ABANDONED_MESSAGE, AnalyticsStore, Catalog, ChangeLog, ExecutionFinish, Ingest,
    InventorySource, JobLog, NewExecution, SalesSource, Store,
};
