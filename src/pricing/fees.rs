//! Marketplace fee schedules and the fee / break-even functions built on them.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::PricingError;
use crate::types::{FulfillmentMethod, Territory};

/// Fee terms for one (territory, fulfillment method) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeSchedule {
    pub territory: Territory,
    pub method: FulfillmentMethod,
    /// Fraction of the sale price, in [0, 1).
    pub referral_pct: f64,
    /// Per-unit fulfillment fee. Only charged for FBA.
    pub fixed_fee: f64,
    /// Per-unit closing fee, charged for both methods.
    pub closing_fee: f64,
}

impl FeeSchedule {
    pub fn new(
        territory: Territory,
        method: FulfillmentMethod,
        referral_pct: f64,
        fixed_fee: f64,
        closing_fee: f64,
    ) -> Result<Self, PricingError> {
        if !(0.0..1.0).contains(&referral_pct) {
            return Err(PricingError::InvalidArgument(format!(
                "referral percentage must be in [0, 1), got {referral_pct}"
            )));
        }
        ensure_non_negative("fixed fee", fixed_fee)?;
        ensure_non_negative("closing fee", closing_fee)?;
        Ok(Self {
            territory,
            method,
            referral_pct,
            fixed_fee,
            closing_fee,
        })
    }

    /// Fixed component actually charged per unit under this schedule's method.
    pub fn per_unit_fixed(&self) -> f64 {
        let fixed = match self.method {
            FulfillmentMethod::Fba => self.fixed_fee,
            FulfillmentMethod::Fbm => 0.0,
        };
        fixed + self.closing_fee
    }

    /// Total marketplace fee for a sale at `price`.
    pub fn fee(&self, price: f64) -> Result<f64, PricingError> {
        ensure_non_negative("price", price)?;
        Ok(price * self.referral_pct + self.per_unit_fixed())
    }

    /// Selling price at which net profit is exactly zero.
    pub fn break_even(&self, cost: f64) -> Result<f64, PricingError> {
        ensure_non_negative("cost", cost)?;
        Ok((cost + self.per_unit_fixed()) / (1.0 - self.referral_pct))
    }

    fn with_referral(mut self, referral_pct: f64) -> Self {
        self.referral_pct = referral_pct;
        self
    }
}

/// Immutable fee reference data keyed by (territory, method), with optional
/// per-category referral overrides.
#[derive(Debug, Clone)]
pub struct FeeTable {
    schedules: HashMap<(Territory, FulfillmentMethod), FeeSchedule>,
    /// (territory, lowercase category) → referral percentage
    category_referral: HashMap<(Territory, String), f64>,
}

impl FeeTable {
    pub fn new(schedules: impl IntoIterator<Item = FeeSchedule>) -> Self {
        Self {
            schedules: schedules
                .into_iter()
                .map(|s| ((s.territory, s.method), s))
                .collect(),
            category_referral: HashMap::new(),
        }
    }

    pub fn with_category_referral(
        mut self,
        territory: Territory,
        category: &str,
        referral_pct: f64,
    ) -> Result<Self, PricingError> {
        if !(0.0..1.0).contains(&referral_pct) {
            return Err(PricingError::InvalidArgument(format!(
                "referral percentage must be in [0, 1), got {referral_pct}"
            )));
        }
        self.category_referral
            .insert((territory, category.trim().to_lowercase()), referral_pct);
        Ok(self)
    }

    pub fn schedule(
        &self,
        territory: Territory,
        method: FulfillmentMethod,
    ) -> Result<FeeSchedule, PricingError> {
        self.schedules
            .get(&(territory, method))
            .copied()
            .ok_or_else(|| {
                PricingError::InvalidArgument(format!("no fee schedule for {territory}/{method}"))
            })
    }

    /// Schedule for an item's category, falling back to the method's default referral rate.
    pub fn schedule_for_category(
        &self,
        territory: Territory,
        method: FulfillmentMethod,
        category: Option<&str>,
    ) -> Result<FeeSchedule, PricingError> {
        let base = self.schedule(territory, method)?;
        let override_pct = category.and_then(|c| {
            self.category_referral
                .get(&(territory, c.trim().to_lowercase()))
                .copied()
        });
        Ok(match override_pct {
            Some(pct) => base.with_referral(pct),
            None => base,
        })
    }

    pub fn fee(
        &self,
        price: f64,
        method: FulfillmentMethod,
        territory: Territory,
    ) -> Result<f64, PricingError> {
        self.schedule(territory, method)?.fee(price)
    }

    pub fn break_even(
        &self,
        cost: f64,
        method: FulfillmentMethod,
        territory: Territory,
    ) -> Result<f64, PricingError> {
        self.schedule(territory, method)?.break_even(cost)
    }
}

impl Default for FeeTable {
    /// Standard book-category terms: 15% referral, FBA fulfillment fee per market.
    fn default() -> Self {
        Self::new([
            FeeSchedule {
                territory: Territory::Us,
                method: FulfillmentMethod::Fba,
                referral_pct: 0.15,
                fixed_fee: 3.00,
                closing_fee: 0.0,
            },
            FeeSchedule {
                territory: Territory::Us,
                method: FulfillmentMethod::Fbm,
                referral_pct: 0.15,
                fixed_fee: 0.0,
                closing_fee: 0.0,
            },
            FeeSchedule {
                territory: Territory::Uk,
                method: FulfillmentMethod::Fba,
                referral_pct: 0.15,
                fixed_fee: 2.80,
                closing_fee: 0.0,
            },
            FeeSchedule {
                territory: Territory::Uk,
                method: FulfillmentMethod::Fbm,
                referral_pct: 0.15,
                fixed_fee: 0.0,
                closing_fee: 0.0,
            },
        ])
    }
}

pub(crate) fn ensure_non_negative(name: &str, value: f64) -> Result<(), PricingError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PricingError::InvalidArgument(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}
