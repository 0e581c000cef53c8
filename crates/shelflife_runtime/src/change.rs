//! Input digests for incremental processing.
//!
//! Each stage hashes every input it is about to read: rows, catalog lookups
//! as resolved, and the configuration that shapes its output. A stage whose
//! digest matches the last successful run for the same snapshot date is
//! skipped.

use chrono::NaiveDate;
use serde::Serialize;
use shelflife_core::{
    ActionConfig, BatchRisk, ChangeTrackingRecord, ContentHasher, DateWindow, Hash,
    InventoryBatch, PipelineResult, RiskConfig, SalesObservation, StoreInfo, VelocityFeature,
};
use shelflife_engine::{ActionRequest, PriceBook};
use shelflife_storage::{AnalyticsStore, Catalog, InventorySource, SalesSource};

/// Digest of one stage's inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDigest {
    /// Content hash
    pub hash: Hash,
    /// Rows read from the tracked table
    pub records: u64,
}

/// Whether a stage must recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Same digest as the last successful run
    Unchanged,
    /// New or different inputs
    Changed {
        /// Human-readable reason
        summary: String,
    },
}

/// Compare a digest with the tracking record of the last successful run
#[must_use]
pub fn detect(previous: Option<&ChangeTrackingRecord>, current: &InputDigest) -> ChangeDecision {
    match previous {
        None => ChangeDecision::Changed {
            summary: "no previous record".to_string(),
        },
        Some(prev) if prev.content_hash == current.hash.to_hex() => ChangeDecision::Unchanged,
        Some(prev) => {
            let old: String = prev.content_hash.chars().take(8).collect();
            ChangeDecision::Changed {
                summary: format!("content changed {}→{}", old, current.hash.short()),
            }
        }
    }
}

#[derive(Serialize)]
enum Tagged<'a> {
    Sales(&'a SalesObservation),
    Inventory(&'a InventoryBatch),
    Feature(&'a VelocityFeature),
    Risk(&'a BatchRisk),
    Store(&'a StoreInfo),
    Price {
        store_id: &'a str,
        sku_id: &'a str,
        unit_price: Option<f64>,
    },
    Category {
        sku_id: &'a str,
        category: &'a str,
    },
}

/// Digest of the sales rows in a feature window
///
/// # Errors
///
/// Returns error if the rows cannot be read or encoded
pub fn sales_digest<S>(store: &S, window: DateWindow) -> PipelineResult<InputDigest>
where
    S: SalesSource + ?Sized,
{
    let rows = store.sales_between(window.start, window.end)?;
    let mut hasher = ContentHasher::new(format!("sales_daily:{}", window));
    for row in &rows {
        hasher.add(&Tagged::Sales(row))?;
    }
    Ok(InputDigest {
        hash: hasher.finish(),
        records: rows.len() as u64,
    })
}

/// Digest of everything risk scoring reads at a snapshot date
///
/// Covers inventory, features, the unit price each batch resolves to
/// and the scoring constants.
///
/// # Errors
///
/// Returns error if the rows cannot be read or encoded
pub fn risk_inputs_digest<S>(
    store: &S,
    date: NaiveDate,
    price_window_days: u32,
    config: &RiskConfig,
) -> PipelineResult<InputDigest>
where
    S: SalesSource + InventorySource + Catalog + AnalyticsStore + ?Sized,
{
    let inventory = store.inventory_at(date)?;
    let features = store.features_at(date)?;
    let prices = PriceBook::load(
        store,
        DateWindow::trailing(date, price_window_days),
        inventory.iter().map(|b| b.sku_id.as_str()),
        config.default_price,
    )?;

    let mut hasher = ContentHasher::new("inventory_batches");
    for row in &inventory {
        hasher.add(&Tagged::Inventory(row))?;
        hasher.add(&Tagged::Price {
            store_id: &row.store_id,
            sku_id: &row.sku_id,
            unit_price: prices.unit_price(&row.store_id, &row.sku_id),
        })?;
    }
    for row in &features {
        hasher.add(&Tagged::Feature(row))?;
    }
    hasher.add(config)?;
    Ok(InputDigest {
        hash: hasher.finish(),
        records: inventory.len() as u64,
    })
}

/// Digest of everything action generation reads at a snapshot date
///
/// Covers risk and feature rows, store topology, SKU categories and the
/// parameters that shape the proposals.
///
/// # Errors
///
/// Returns error if the rows cannot be read or encoded
pub fn action_inputs_digest<S>(
    store: &S,
    date: NaiveDate,
    request: &ActionRequest,
    config: &ActionConfig,
) -> PipelineResult<InputDigest>
where
    S: AnalyticsStore + Catalog + ?Sized,
{
    let risk = store.risk_at(date)?;
    let features = store.features_at(date)?;
    let stores = store.stores()?;
    let catalog = PriceBook::catalog(store, risk.iter().map(|r| r.sku_id.as_str()))?;

    let mut hasher = ContentHasher::new("batch_risk");
    for row in &risk {
        hasher.add(&Tagged::Risk(row))?;
        hasher.add(&Tagged::Category {
            sku_id: &row.sku_id,
            category: catalog.category(&row.sku_id),
        })?;
    }
    for row in &features {
        hasher.add(&Tagged::Feature(row))?;
    }
    for row in &stores {
        hasher.add(&Tagged::Store(row))?;
    }
    hasher.add(&(request, config))?;
    Ok(InputDigest {
        hash: hasher.finish(),
        records: risk.len() as u64,
    })
}
