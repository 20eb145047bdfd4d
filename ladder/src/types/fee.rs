use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TierLevel;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Trading fee after ladder and special tier reductions.
///
/// Percentages stack additively and the total is capped at 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSchedule {
    /// Undiscounted trading fee as a fraction (0.0025 = 0.25%).
    pub base_fee_rate: Decimal,
    pub tier_discount_pct: Decimal,
    pub special_discount_pct: Decimal,
    pub total_discount_pct: Decimal,
    /// `base_fee_rate * (1 - total_discount_pct / 100)`.
    pub effective_fee_rate: Decimal,
}

impl FeeSchedule {
    pub fn new(base_fee_rate: Decimal, tier_discount_pct: Decimal, special_discount_pct: Decimal) -> Self {
        let total_discount_pct = (tier_discount_pct + special_discount_pct).min(HUNDRED);
        let effective_fee_rate = base_fee_rate * (HUNDRED - total_discount_pct) / HUNDRED;
        Self {
            base_fee_rate,
            tier_discount_pct,
            special_discount_pct,
            total_discount_pct,
            effective_fee_rate: effective_fee_rate.normalize(),
        }
    }

    /// Fee saved on `volume` compared to the undiscounted rate.
    pub fn fee_saved(&self, volume: Decimal) -> Decimal {
        (volume * (self.base_fee_rate - self.effective_fee_rate)).normalize()
    }
}

/// One row of the published fee structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeTierRow {
    pub level: TierLevel,
    pub name: String,
    pub discount_pct: Decimal,
    pub effective_fee_rate: Decimal,
    pub benefits: Vec<String>,
}
