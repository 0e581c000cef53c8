//! Action recommendations: transfer, markdown and liquidation.
//!
//! Candidates are generated per at-risk batch, filtered by the requested
//! types, and ranked globally by expected savings. Preferences adjust the
//! policy knobs but never the ranking key.

use crate::pricing::PriceBook;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shelflife_core::model::region_of;
use shelflife_core::{
    ActionConfig, ActionId, ActionProposal, ActionStatus, ActionType, BatchRisk, PipelineResult,
    VelocityFeature,
};
use shelflife_storage::{AnalyticsStore, Catalog};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the caller wants the recommendations to favour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeFor {
    /// Default policy
    #[default]
    Balanced,
    /// Fewer, safer transfers
    Stability,
    /// Shallower discounts
    Profit,
    /// Clear as much stock as possible
    WasteMin,
}

/// Caller preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPreferences {
    /// Optimization target
    #[serde(default)]
    pub optimize_for: OptimizeFor,
}

/// Parameters of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionRequest {
    /// Risk rows below this score are ignored
    pub min_risk_score: f64,
    /// Propose transfers
    pub include_transfers: bool,
    /// Propose markdowns
    pub include_markdowns: bool,
    /// Propose liquidations
    pub include_liquidations: bool,
    /// Optional preferences
    pub preferences: Option<ActionPreferences>,
}

impl Default for ActionRequest {
    fn default() -> Self {
        Self {
            min_risk_score: 50.0,
            include_transfers: true,
            include_markdowns: true,
            include_liquidations: true,
            preferences: None,
        }
    }
}

impl ActionRequest {
    fn includes(&self, action_type: ActionType) -> bool {
        match action_type {
            ActionType::Transfer => self.include_transfers,
            ActionType::Markdown => self.include_markdowns,
            ActionType::Liquidate => self.include_liquidations,
        }
    }
}

/// Effective policy after applying preferences
#[derive(Debug, Clone, PartialEq)]
struct Policy {
    lead_days: i64,
    velocity_ratio: f64,
    cost_per_unit: f64,
    cross_region_factor: f64,
    max_destinations: usize,
    max_discount: f64,
    elasticity: f64,
    critical_days: i64,
    fixed_fee: f64,
    unit_handling: f64,
}

impl Policy {
    fn new(config: &ActionConfig, preferences: Option<&ActionPreferences>) -> Self {
        let mut policy = Self {
            lead_days: config.transfer_lead_days,
            velocity_ratio: config.velocity_ratio,
            cost_per_unit: config.transfer_cost_per_unit,
            cross_region_factor: config.cross_region_factor,
            max_destinations: config.max_transfer_destinations,
            max_discount: config.max_discount,
            elasticity: config.markdown_elasticity,
            critical_days: config.critical_days,
            fixed_fee: config.liquidation_fixed_fee,
            unit_handling: config.liquidation_unit_handling,
        };
        match preferences.map(|p| p.optimize_for).unwrap_or_default() {
            OptimizeFor::Balanced => {}
            OptimizeFor::WasteMin => {
                policy.max_discount = (policy.max_discount + 0.1).min(0.9);
                policy.critical_days += 2;
            }
            OptimizeFor::Profit => {
                policy.max_discount = (policy.max_discount - 0.2).max(0.1);
                policy.velocity_ratio = 1.1;
            }
            OptimizeFor::Stability => {
                policy.max_destinations = 1;
                policy.velocity_ratio = 1.5;
            }
        }
        policy
    }
}

/// Salvage recovery rate before time and risk adjustments
#[must_use]
pub fn base_recovery_rate(category: &str) -> f64 {
    match category {
        "food" => 0.15,
        "beverage" => 0.20,
        "personal_care" => 0.35,
        "household" => 0.40,
        _ => 0.25,
    }
}

/// Handling cost multiplier for liquidation
#[must_use]
pub fn handling_multiplier(category: &str) -> f64 {
    match category {
        "food" => 1.5,
        "beverage" => 1.3,
        "electronics" => 1.2,
        _ => 1.0,
    }
}

/// Ranking order: savings descending, then feasibility descending, then type, then key
#[must_use]
pub fn rank_order(a: &ActionProposal, b: &ActionProposal) -> Ordering {
    b.expected_savings
        .total_cmp(&a.expected_savings)
        .then_with(|| b.feasibility_score.total_cmp(&a.feasibility_score))
        .then_with(|| a.action_type.cmp(&b.action_type))
        .then_with(|| {
            (&a.from_store, &a.sku_id, &a.batch_id, &a.to_store)
                .cmp(&(&b.from_store, &b.sku_id, &b.batch_id, &b.to_store))
        })
}

#[derive(Debug, Clone)]
struct Candidate {
    proposal: ActionProposal,
    cleared: u32,
}

struct Context<'a> {
    date: NaiveDate,
    policy: &'a Policy,
    features: &'a BTreeMap<(String, String), VelocityFeature>,
    // highest risk score per (store, sku)
    risk_by_pair: &'a BTreeMap<(String, String), f64>,
    regions: &'a BTreeMap<String, String>,
    catalog: &'a PriceBook,
}

impl Context<'_> {
    fn region(&self, store_id: &str) -> String {
        self.regions
            .get(store_id)
            .cloned()
            .unwrap_or_else(|| region_of(store_id))
    }

    fn category(&self, sku_id: &str) -> &str {
        self.catalog.category(sku_id)
    }

    fn velocity(&self, store_id: &str, sku_id: &str) -> Option<&VelocityFeature> {
        self.features.get(&(store_id.to_string(), sku_id.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn proposal(
        &self,
        risk: &BatchRisk,
        action_type: ActionType,
        to_store: Option<&str>,
        qty: u32,
        discount_pct: Option<f64>,
        expected_savings: f64,
        feasibility_score: f64,
    ) -> ActionProposal {
        let key = ActionProposal::natural_key(
            self.date,
            action_type,
            &risk.store_id,
            to_store,
            &risk.sku_id,
            &risk.batch_id,
        );
        ActionProposal {
            action_id: ActionId::from_name(&key),
            snapshot_date: self.date,
            action_type,
            from_store: risk.store_id.clone(),
            to_store: to_store.map(str::to_string),
            sku_id: risk.sku_id.clone(),
            batch_id: risk.batch_id.clone(),
            qty,
            discount_pct,
            expected_savings: expected_savings.max(0.0),
            feasibility_score: feasibility_score.clamp(0.0, 1.0),
            status: ActionStatus::Proposed,
        }
    }

    fn transfers(&self, risk: &BatchRisk) -> Vec<Candidate> {
        let policy = self.policy;
        let days = risk.days_to_expiry;
        if days <= policy.lead_days || risk.at_risk_units == 0 {
            return Vec::new();
        }
        let source_v14 = self
            .velocity(&risk.store_id, &risk.sku_id)
            .map_or(0.0, |f| f.v14);
        let source_region = self.region(&risk.store_id);

        let mut candidates: Vec<Candidate> = self
            .features
            .values()
            .filter(|dest| dest.sku_id == risk.sku_id && dest.store_id != risk.store_id)
            .filter(|dest| dest.v14 > source_v14 * policy.velocity_ratio)
            .filter(|dest| {
                self.risk_by_pair
                    .get(&(dest.store_id.clone(), dest.sku_id.clone()))
                    .is_none_or(|score| *score < risk.risk_score)
            })
            .filter_map(|dest| {
                let delta_v = dest.v14 - source_v14;
                let capacity = (delta_v * (days - policy.lead_days) as f64).floor();
                let qty = (capacity.max(0.0) as u32).min(risk.at_risk_units);
                if qty == 0 {
                    return None;
                }
                let factor = if self.region(&dest.store_id) == source_region {
                    1.0
                } else {
                    policy.cross_region_factor
                };
                let cost = f64::from(qty) * policy.cost_per_unit * factor;
                let avoided = risk.at_risk_value.min(f64::from(qty) * risk.unit_price);
                let savings = avoided - cost;
                let feasibility = 0.4 * (delta_v / 10.0).min(1.0)
                    + 0.4 * (avoided / cost.max(1.0) / 10.0).min(1.0)
                    + 0.2 * 0.8;
                (savings > 0.0 && feasibility > 0.3).then(|| Candidate {
                    proposal: self.proposal(
                        risk,
                        ActionType::Transfer,
                        Some(&dest.store_id),
                        qty,
                        None,
                        savings,
                        feasibility,
                    ),
                    cleared: qty,
                })
            })
            .collect();

        candidates.sort_by(|a, b| rank_order(&a.proposal, &b.proposal));
        candidates.truncate(policy.max_destinations);
        candidates
    }

    fn markdown(&self, risk: &BatchRisk) -> Option<Candidate> {
        let policy = self.policy;
        let days = risk.days_to_expiry;
        if days < 0 || risk.at_risk_units == 0 {
            return None;
        }
        let feature = self.velocity(&risk.store_id, &risk.sku_id);
        let v14 = feature.map_or(0.0, |f| f.v14);
        let volatility = feature.map_or(0.0, |f| f.volatility);

        let urgency = ((30.0 - days as f64) / 30.0).max(0.0);
        let slow_mover = ((5.0 - v14) / 5.0).max(0.0);
        let discount = (0.4 * urgency + 0.3 * risk.risk_score / 100.0 + 0.2 * slow_mover)
            .min(policy.max_discount);
        if discount <= 0.0 {
            return None;
        }

        let lift = (policy.elasticity * discount).min(1.0)
            * (1.0 - volatility / 10.0).max(0.5)
            * (days.max(1) as f64 / 14.0).min(1.0);
        let cleared = (f64::from(risk.at_risk_units) * lift).floor() as u32;
        let savings = f64::from(cleared) * risk.unit_price * (1.0 - discount);
        if savings <= 0.0 {
            return None;
        }
        let discount_pct = (discount * 1000.0).round() / 10.0;
        Some(Candidate {
            proposal: self.proposal(
                risk,
                ActionType::Markdown,
                None,
                risk.at_risk_units,
                Some(discount_pct),
                savings,
                lift,
            ),
            cleared,
        })
    }

    fn liquidation(&self, risk: &BatchRisk, cleared: u32) -> Option<Candidate> {
        let policy = self.policy;
        let days = risk.days_to_expiry;
        if days > policy.critical_days || cleared >= risk.at_risk_units {
            return None;
        }
        let qty = risk.at_risk_units - cleared;
        let category = self.category(&risk.sku_id);
        let recovery_rate = base_recovery_rate(category)
            * (days as f64 / 30.0).max(0.5)
            * ((100.0 - risk.risk_score) / 100.0).max(0.5);
        let salvage = f64::from(qty) * risk.unit_price * recovery_rate;
        let handling =
            policy.fixed_fee + f64::from(qty) * policy.unit_handling * handling_multiplier(category);
        let savings = (salvage - handling).max(0.0);
        Some(Candidate {
            proposal: self.proposal(
                risk,
                ActionType::Liquidate,
                None,
                qty,
                None,
                savings,
                recovery_rate,
            ),
            cleared: qty,
        })
    }

    fn candidates(&self, risk: &BatchRisk, request: &ActionRequest) -> Vec<Candidate> {
        let mut found = Vec::new();
        if request.include_transfers {
            found.extend(self.transfers(risk));
        }
        if request.include_markdowns {
            found.extend(self.markdown(risk));
        }
        found.sort_by(|a, b| rank_order(&a.proposal, &b.proposal));

        if request.includes(ActionType::Liquidate) {
            let best_cleared = found.first().map_or(0, |c| c.cleared);
            found.extend(self.liquidation(risk, best_cleared));
        }
        found
    }
}

/// Generates ranked mitigation proposals from persisted risk rows
pub struct ActionEngine<S: ?Sized> {
    store: Arc<S>,
    config: ActionConfig,
}

impl<S> ActionEngine<S>
where
    S: AnalyticsStore + Catalog + ?Sized,
{
    /// Create an engine over a store
    #[must_use]
    pub fn new(store: Arc<S>, config: ActionConfig) -> Self {
        Self { store, config }
    }

    /// Rank proposals for a snapshot date without persisting them
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn generate_actions(
        &self,
        snapshot_date: NaiveDate,
        request: &ActionRequest,
    ) -> PipelineResult<Vec<ActionProposal>> {
        let policy = Policy::new(&self.config, request.preferences.as_ref());

        let all_risk = self.store.risk_at(snapshot_date)?;
        let mut risk_by_pair: BTreeMap<(String, String), f64> = BTreeMap::new();
        for row in &all_risk {
            let entry = risk_by_pair
                .entry((row.store_id.clone(), row.sku_id.clone()))
                .or_insert(row.risk_score);
            *entry = entry.max(row.risk_score);
        }

        let features: BTreeMap<(String, String), VelocityFeature> = self
            .store
            .features_at(snapshot_date)?
            .into_iter()
            .map(|f| ((f.store_id.clone(), f.sku_id.clone()), f))
            .collect();
        let regions: BTreeMap<String, String> = self
            .store
            .stores()?
            .into_iter()
            .map(|s| (s.store_id.clone(), s.region()))
            .collect();

        let at_risk: Vec<&BatchRisk> = all_risk
            .iter()
            .filter(|r| r.risk_score >= request.min_risk_score && r.at_risk_units > 0)
            .collect();
        let catalog = PriceBook::catalog(
            self.store.as_ref(),
            at_risk.iter().map(|r| r.sku_id.as_str()),
        )?;

        let context = Context {
            date: snapshot_date,
            policy: &policy,
            features: &features,
            risk_by_pair: &risk_by_pair,
            regions: &regions,
            catalog: &catalog,
        };

        let mut proposals: Vec<ActionProposal> = at_risk
            .iter()
            .flat_map(|risk| context.candidates(risk, request))
            .map(|c| c.proposal)
            .filter(|p| request.includes(p.action_type))
            .collect();
        proposals.sort_by(rank_order);

        tracing::info!(
            %snapshot_date,
            batches = at_risk.len(),
            proposals = proposals.len(),
            "actions generated"
        );
        Ok(proposals)
    }
}

/// Totals of a ranked proposal list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionTotals {
    /// Number of transfer proposals
    pub transfers: usize,
    /// Number of markdown proposals
    pub markdowns: usize,
    /// Number of liquidation proposals
    pub liquidations: usize,
    /// Sum of expected savings
    pub total_expected_savings: f64,
}

impl ActionTotals {
    /// Tally a proposal list
    #[must_use]
    pub fn of(proposals: &[ActionProposal]) -> Self {
        let mut totals = Self::default();
        for p in proposals {
            match p.action_type {
                ActionType::Transfer => totals.transfers += 1,
                ActionType::Markdown => totals.markdowns += 1,
                ActionType::Liquidate => totals.liquidations += 1,
            }
            totals.total_expected_savings += p.expected_savings;
        }
        totals
    }
}
