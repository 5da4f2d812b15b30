//! Acquisition cost, minimum-ROI target price, and realized ROI.
//!
//! Every derived selling price goes through [`target_price`]; call sites pass
//! the ROI target and fee schedule explicitly instead of carrying their own
//! constants.

use serde::Serialize;

use crate::config::VOLUME_DISCOUNT_TIERS;
use crate::error::PricingError;
use crate::pricing::fees::{ensure_non_negative, FeeSchedule, FeeTable};
use crate::types::{CatalogItem, Competitiveness, FulfillmentMethod, PriceSignal, RoiResult};

/// Fee, profit and ROI at one candidate price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub fee: f64,
    pub net_profit: f64,
    pub roi_percent: f64,
}

/// Fraction off acquisition cost for a purchase of `quantity` units.
pub fn volume_discount(quantity: u32) -> f64 {
    tiered_discount(VOLUME_DISCOUNT_TIERS, quantity)
}

fn tiered_discount(tiers: &[(u32, f64)], quantity: u32) -> f64 {
    let floor = tiers.first().map(|&(_, rate)| rate).unwrap_or(0.0);
    tiers
        .iter()
        .take_while(|&&(threshold, _)| quantity >= threshold)
        .last()
        .map(|&(_, rate)| rate)
        .unwrap_or(floor)
}

/// Price that earns exactly `min_roi` (fraction) on `cost` after fees.
pub fn target_price(cost: f64, min_roi: f64, schedule: &FeeSchedule) -> Result<f64, PricingError> {
    ensure_non_negative("cost", cost)?;
    ensure_non_negative("minimum ROI", min_roi)?;
    Ok((cost * (1.0 + min_roi) + schedule.per_unit_fixed()) / (1.0 - schedule.referral_pct))
}

/// ROI as a percentage. Zero cost has no defined ROI.
pub fn roi_percent(net_profit: f64, cost: f64) -> Result<f64, PricingError> {
    ensure_non_negative("cost", cost)?;
    if cost == 0.0 {
        return Err(PricingError::DivisionUndefined);
    }
    Ok(net_profit / cost * 100.0)
}

pub fn net_profit(price: f64, cost: f64, schedule: &FeeSchedule) -> Result<(f64, f64), PricingError> {
    ensure_non_negative("cost", cost)?;
    let fee = schedule.fee(price)?;
    Ok((fee, price - fee - cost))
}

pub fn evaluate_at(price: f64, cost: f64, schedule: &FeeSchedule) -> Result<Evaluation, PricingError> {
    let (fee, net_profit) = net_profit(price, cost, schedule)?;
    Ok(Evaluation {
        fee,
        net_profit,
        roi_percent: roi_percent(net_profit, cost)?,
    })
}

pub fn competitiveness(target_price: f64, reference_price: f64) -> Competitiveness {
    if !reference_price.is_finite() || reference_price <= 0.0 {
        return Competitiveness::Unknown;
    }
    Competitiveness::from_ratio(target_price / reference_price)
}

/// Profitability calculator bound to a fee table, an ROI target and discount tiers.
#[derive(Debug, Clone)]
pub struct ProfitabilityEngine {
    fees: FeeTable,
    min_roi: f64,
    tiers: Vec<(u32, f64)>,
}

impl ProfitabilityEngine {
    pub fn new(fees: FeeTable, min_roi: f64) -> Result<Self, PricingError> {
        ensure_non_negative("minimum ROI", min_roi)?;
        Ok(Self {
            fees,
            min_roi,
            tiers: VOLUME_DISCOUNT_TIERS.to_vec(),
        })
    }

    /// Replace the volume discount tiers. Tiers must be ascending in both
    /// threshold and rate, with rates in [0, 1).
    pub fn with_tiers(mut self, tiers: Vec<(u32, f64)>) -> Result<Self, PricingError> {
        let ascending = tiers
            .windows(2)
            .all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1);
        let in_range = tiers.iter().all(|&(_, r)| (0.0..1.0).contains(&r));
        if tiers.is_empty() || !ascending || !in_range {
            return Err(PricingError::InvalidArgument(
                "volume discount tiers must be non-empty and ascending".to_string(),
            ));
        }
        self.tiers = tiers;
        Ok(self)
    }

    pub fn fees(&self) -> &FeeTable {
        &self.fees
    }

    pub fn min_roi(&self) -> f64 {
        self.min_roi
    }

    pub fn volume_discount(&self, quantity: u32) -> f64 {
        tiered_discount(&self.tiers, quantity)
    }

    pub fn effective_cost(&self, base_cost: f64, quantity: u32) -> Result<f64, PricingError> {
        ensure_non_negative("cost", base_cost)?;
        Ok(base_cost * (1.0 - self.volume_discount(quantity)))
    }

    pub fn schedule_for(
        &self,
        item: &CatalogItem,
        method: FulfillmentMethod,
    ) -> Result<FeeSchedule, PricingError> {
        self.fees
            .schedule_for_category(item.territory, method, item.category.as_deref())
    }

    /// Full profitability snapshot for `item` bought in `quantity` and priced
    /// against `reference`.
    pub fn analyze(
        &self,
        item: &CatalogItem,
        quantity: u32,
        reference: &PriceSignal,
        method: FulfillmentMethod,
    ) -> Result<RoiResult, PricingError> {
        let schedule = self.schedule_for(item, method)?;
        let cost = self.effective_cost(item.wholesale_cost, quantity)?;
        let target = target_price(cost, self.min_roi, &schedule)?;
        let (fee, profit) = net_profit(target, cost, &schedule)?;
        let roi = match roi_percent(profit, cost) {
            Ok(r) => Some(r),
            Err(PricingError::DivisionUndefined) => None,
            Err(e) => return Err(e),
        };
        let reference_price = if reference.currency() == item.currency() {
            reference.value()
        } else {
            0.0
        };

        Ok(RoiResult {
            acquisition_cost: cost,
            target_price: target,
            reference_price,
            fee,
            net_profit: profit,
            roi_percent: roi,
            competitiveness: competitiveness(target, reference_price),
            territory: item.territory,
            method,
        })
    }
}
