//! Unit price resolution.
//!
//! Order: SKU MRP, latest selling price for the store/SKU in the window,
//! SKU unit cost, configured default. Non-positive values are skipped.

use shelflife_core::{DateWindow, PipelineResult, SkuInfo};
use shelflife_storage::{Catalog, SalesSource};
use std::collections::{BTreeMap, BTreeSet};

/// Category used when a SKU is not in the catalog
pub const DEFAULT_CATEGORY: &str = "general";

/// Price lookup for a set of SKUs
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    skus: BTreeMap<String, SkuInfo>,
    latest_sold: BTreeMap<(String, String), f64>,
    default_price: f64,
}

fn catalog_entries<S>(store: &S, wanted: &BTreeSet<&str>) -> PipelineResult<BTreeMap<String, SkuInfo>>
where
    S: Catalog + ?Sized,
{
    let mut skus = BTreeMap::new();
    for sku_id in wanted {
        if let Some(info) = store.sku(sku_id)? {
            skus.insert(info.sku_id.clone(), info);
        }
    }
    Ok(skus)
}

impl PriceBook {
    /// Load catalog entries for `sku_ids` only, with no selling prices
    ///
    /// # Errors
    ///
    /// Returns error if the catalog cannot be read
    pub fn catalog<'a, S, I>(store: &S, sku_ids: I) -> PipelineResult<Self>
    where
        S: Catalog + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = sku_ids.into_iter().collect();
        Ok(Self {
            skus: catalog_entries(store, &wanted)?,
            ..Self::default()
        })
    }

    /// Load catalog entries for `sku_ids` and selling prices in `window`
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn load<'a, S, I>(
        store: &S,
        window: DateWindow,
        sku_ids: I,
        default_price: f64,
    ) -> PipelineResult<Self>
    where
        S: SalesSource + Catalog + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = sku_ids.into_iter().collect();
        let skus = catalog_entries(store, &wanted)?;

        // Rows come back in (date, store, sku) order, so later rows win
        let mut latest_sold = BTreeMap::new();
        for row in store.sales_between(window.start, window.end)? {
            if wanted.contains(row.sku_id.as_str()) && row.selling_price > 0.0 {
                latest_sold.insert((row.store_id, row.sku_id), row.selling_price);
            }
        }

        Ok(Self {
            skus,
            latest_sold,
            default_price,
        })
    }

    /// Resolve the unit price, or `None` if nothing positive is known
    #[must_use]
    pub fn unit_price(&self, store_id: &str, sku_id: &str) -> Option<f64> {
        let sku = self.skus.get(sku_id);
        sku.and_then(|s| s.mrp)
            .filter(|p| *p > 0.0)
            .or_else(|| {
                self.latest_sold
                    .get(&(store_id.to_string(), sku_id.to_string()))
                    .copied()
            })
            .or_else(|| sku.and_then(|s| s.unit_cost).filter(|p| *p > 0.0))
            .or_else(|| (self.default_price > 0.0).then_some(self.default_price))
    }

    /// Catalog category of a SKU
    #[must_use]
    pub fn category(&self, sku_id: &str) -> &str {
        self.skus
            .get(sku_id)
            .map_or(DEFAULT_CATEGORY, |s| s.category.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(mrp: Option<f64>, unit_cost: Option<f64>) -> SkuInfo {
        SkuInfo {
            sku_id: "A".to_string(),
            category: "food".to_string(),
            mrp,
            unit_cost,
        }
    }

    fn sold(price: f64) -> ((String, String), f64) {
        (("S1".to_string(), "A".to_string()), price)
    }

    fn book<const N: usize, const M: usize>(
        skus: [SkuInfo; N],
        latest_sold: [((String, String), f64); M],
        default_price: f64,
    ) -> PriceBook {
        PriceBook {
            skus: skus.into_iter().map(|s| (s.sku_id.clone(), s)).collect(),
            latest_sold: latest_sold.into_iter().collect(),
            default_price,
        }
    }

    #[test]
    fn test_mrp_wins() {
        let prices = book([sku(Some(5.0), Some(2.0))], [sold(4.0)], 10.0);
        assert_eq!(prices.unit_price("S1", "A"), Some(5.0));
    }

    #[test]
    fn test_selling_price_before_cost() {
        let prices = book([sku(None, Some(2.0))], [sold(4.0)], 10.0);
        assert_eq!(prices.unit_price("S1", "A"), Some(4.0));
        assert_eq!(prices.unit_price("S2", "A"), Some(2.0));
    }

    #[test]
    fn test_default_price_fallback() {
        let prices = book([], [], 10.0);
        assert_eq!(prices.unit_price("S1", "A"), Some(10.0));
        assert_eq!(prices.category("A"), DEFAULT_CATEGORY);

        let disabled = book([], [], 0.0);
        assert_eq!(disabled.unit_price("S1", "A"), None);
    }

    #[test]
    fn test_zero_mrp_ignored() {
        let prices = book([sku(Some(0.0), None)], [], 10.0);
        assert_eq!(prices.unit_price("S1", "A"), Some(10.0));
        assert_eq!(prices.category("A"), "food");
    }

    #[test]
    fn test_load_from_store() {
        use shelflife_core::SalesObservation;
        use shelflife_storage::{Ingest, MemoryStore};

        let store = MemoryStore::new();
        store.put_skus(&[sku(None, Some(2.0))]).unwrap();
        let day: chrono::NaiveDate = "2024-03-01".parse().unwrap();
        store
            .append_sales(&[
                SalesObservation {
                    date: day,
                    store_id: "S1".to_string(),
                    sku_id: "B".to_string(),
                    units_sold: 1,
                    selling_price: 3.5,
                },
                SalesObservation {
                    date: day,
                    store_id: "S1".to_string(),
                    sku_id: "Z".to_string(),
                    units_sold: 1,
                    selling_price: 9.0,
                },
            ])
            .unwrap();

        let window = DateWindow::trailing(day, 7);
        let prices = PriceBook::load(&store, window, ["A", "B"], 0.0).unwrap();
        assert_eq!(prices.unit_price("S1", "A"), Some(2.0));
        assert_eq!(prices.unit_price("S1", "B"), Some(3.5));
        assert_eq!(prices.unit_price("S1", "Z"), None);

        let catalog = PriceBook::catalog(&store, ["A", "B"]).unwrap();
        assert_eq!(catalog.category("A"), "food");
        assert_eq!(catalog.category("B"), DEFAULT_CATEGORY);
        assert_eq!(catalog.unit_price("S1", "B"), None);
    }
}
