//! Interactive what-if pricing around a base [`RoiResult`].
//!
//! The model remembers the last simulated price so it can tell when the user
//! drags across a snap point (break-even or the market reference price).

use serde::Serialize;

use crate::config::{sensitivity_bounds, SNAP_THRESHOLD};
use crate::error::PricingError;
use crate::pricing::fees::FeeSchedule;
use crate::pricing::profitability::{competitiveness, net_profit, roi_percent};
use crate::types::{Competitiveness, RoiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapPoint {
    BreakEven,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityPoint {
    /// Price actually evaluated, after clamping and snapping.
    pub price: f64,
    pub requested_price: f64,
    pub snapped_to: Option<SnapPoint>,
    pub fee: f64,
    pub net_profit: f64,
    pub roi_percent: Option<f64>,
    pub competitiveness: Competitiveness,
}

#[derive(Debug, Clone)]
pub struct SensitivityModel {
    schedule: FeeSchedule,
    cost: f64,
    reference_price: f64,
    break_even: f64,
    min_price: f64,
    max_price: f64,
    previous_price: f64,
    snap_threshold: f64,
}

impl SensitivityModel {
    /// `schedule` must be the schedule `base` was computed with.
    pub fn new(base: &RoiResult, schedule: FeeSchedule) -> Result<Self, PricingError> {
        let cost = base.acquisition_cost;
        let break_even = schedule.break_even(cost)?;
        let reference_price = if base.reference_price.is_finite() && base.reference_price > 0.0 {
            base.reference_price
        } else {
            0.0
        };

        let min_price = cost * sensitivity_bounds::COST_FLOOR;
        let max_price = (reference_price * sensitivity_bounds::REFERENCE_CEILING)
            .max(base.target_price * sensitivity_bounds::TARGET_CEILING)
            .max(min_price);

        Ok(Self {
            schedule,
            cost,
            reference_price,
            break_even,
            min_price,
            max_price,
            previous_price: base.target_price.clamp(min_price, max_price),
            snap_threshold: SNAP_THRESHOLD,
        })
    }

    pub fn with_snap_threshold(mut self, threshold: f64) -> Self {
        self.snap_threshold = threshold.max(0.0);
        self
    }

    /// Start the slider from a known position instead of the target price.
    pub fn starting_at(mut self, price: f64) -> Self {
        if price.is_finite() {
            self.previous_price = price.clamp(self.min_price, self.max_price);
        }
        self
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_price, self.max_price)
    }

    pub fn break_even(&self) -> f64 {
        self.break_even
    }

    pub fn previous_price(&self) -> f64 {
        self.previous_price
    }

    /// Evaluate at `requested`, clamped to the valid range and snapped onto a
    /// snap point when the move crosses one within the threshold.
    pub fn recompute(&mut self, requested: f64) -> Result<SensitivityPoint, PricingError> {
        if !requested.is_finite() {
            return Err(PricingError::InvalidArgument(format!(
                "simulated price must be finite, got {requested}"
            )));
        }
        let clamped = requested.clamp(self.min_price, self.max_price);
        let (price, snapped_to) = match self.snap(clamped) {
            Some((point, value)) => (value, Some(point)),
            None => (clamped, None),
        };

        let (fee, profit) = net_profit(price, self.cost, &self.schedule)?;
        let roi = match roi_percent(profit, self.cost) {
            Ok(r) => Some(r),
            Err(PricingError::DivisionUndefined) => None,
            Err(e) => return Err(e),
        };

        self.previous_price = price;

        Ok(SensitivityPoint {
            price,
            requested_price: requested,
            snapped_to,
            fee,
            net_profit: profit,
            roi_percent: roi,
            competitiveness: competitiveness(price, self.reference_price),
        })
    }

    fn snap_points(&self) -> impl Iterator<Item = (SnapPoint, f64)> + '_ {
        let reference = (self.reference_price > 0.0).then_some((SnapPoint::Reference, self.reference_price));
        std::iter::once((SnapPoint::BreakEven, self.break_even))
            .chain(reference)
            .filter(|&(_, p)| p >= self.min_price && p <= self.max_price)
    }

    fn snap(&self, requested: f64) -> Option<(SnapPoint, f64)> {
        self.snap_points()
            .filter(|&(_, point)| {
                let near = (requested - point).abs() <= self.snap_threshold;
                let crossed = (self.previous_price - point) * (requested - point) < 0.0;
                near && crossed
            })
            .min_by(|a, b| {
                (requested - a.1)
                    .abs()
                    .total_cmp(&(requested - b.1).abs())
            })
    }
}
