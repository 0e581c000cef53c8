//! Natural-key rendering and validation.
//!
//! Keys are `|`-joined strings whose first component is an ISO date, so
//! lexical order equals chronological order. A date range `[lo, hi]` is the
//! half-open key range `"lo|" .. "hi}"`, since `}` sorts right after `|`.

use crate::error::{StoreError, StoreResult};
use chrono::NaiveDate;
use shelflife_core::model::KEY_SEPARATOR;
use shelflife_core::{ExecutionId, InventoryBatch, SalesObservation, SkuInfo, StoreInfo};

/// Reject identifiers that would corrupt key ordering
///
/// # Errors
///
/// Returns `InvalidKey` for empty identifiers or ones containing the separator
pub fn validate_id(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidKey {
            key: field.to_string(),
            reason: "identifier must not be empty".to_string(),
        });
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(StoreError::InvalidKey {
            key: value.to_string(),
            reason: format!("{} must not contain '{}'", field, KEY_SEPARATOR),
        });
    }
    Ok(())
}

/// Bounds of every key whose date component lies in `[start, end]`
#[must_use]
pub fn date_bounds(start: NaiveDate, end: NaiveDate) -> (String, String) {
    (format!("{}|", start), format!("{}}}", end))
}

/// Bounds of every key under a string prefix component
#[must_use]
pub fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{}|", prefix), format!("{}}}", prefix))
}

/// Key of a persisted action at its rank
#[must_use]
pub fn action_key(date: NaiveDate, rank: usize) -> String {
    format!("{}|{:06}", date, rank)
}

/// Key of a job execution, ordered by id within a job
#[must_use]
pub fn execution_key(job_name: &str, id: ExecutionId) -> String {
    format!("{}|{:020}", job_name, id.as_u64())
}

/// Validate a sales row at ingestion
///
/// # Errors
///
/// Returns `InvalidKey` for malformed identifiers or an unusable price
pub fn check_sales(row: &SalesObservation) -> StoreResult<()> {
    validate_id("store_id", &row.store_id)?;
    validate_id("sku_id", &row.sku_id)?;
    if !row.selling_price.is_finite() || row.selling_price < 0.0 {
        return Err(StoreError::InvalidKey {
            key: row.key(),
            reason: "selling_price must be a non-negative number".to_string(),
        });
    }
    Ok(())
}

/// Validate an inventory row at ingestion
///
/// # Errors
///
/// Returns `InvalidKey` for malformed identifiers
pub fn check_inventory(row: &InventoryBatch) -> StoreResult<()> {
    validate_id("store_id", &row.store_id)?;
    validate_id("sku_id", &row.sku_id)?;
    validate_id("batch_id", &row.batch_id)
}

/// Validate a SKU master row
///
/// # Errors
///
/// Returns `InvalidKey` for malformed identifiers
pub fn check_sku(row: &SkuInfo) -> StoreResult<()> {
    validate_id("sku_id", &row.sku_id)
}

/// Validate a store master row
///
/// # Errors
///
/// Returns `InvalidKey` for malformed identifiers
pub fn check_store(row: &StoreInfo) -> StoreResult<()> {
    validate_id("store_id", &row.store_id)
}

/// Ensure every row of a per-date write carries that date
///
/// # Errors
///
/// Returns `InvalidKey` naming the first mismatching row
pub fn check_dates<I>(date: NaiveDate, rows: I) -> StoreResult<()>
where
    I: IntoIterator<Item = (NaiveDate, String)>,
{
    for (row_date, key) in rows {
        if row_date != date {
            return Err(StoreError::InvalidKey {
                key,
                reason: format!("row dated {} written under {}", row_date, date),
            });
        }
    }
    Ok(())
}
