pub mod fees;
pub mod profitability;
pub mod sensitivity;

pub use fees::{FeeSchedule, FeeTable};
pub use profitability::{
    competitiveness, evaluate_at, target_price, volume_discount, Evaluation, ProfitabilityEngine,
};
pub use sensitivity::{SensitivityModel, SensitivityPoint, SnapPoint};
