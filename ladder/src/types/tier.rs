use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::BadgeId;

/// Position of a tier on the ladder. `0` means no tier.
pub type TierLevel = u8;

/// One rung of the ordered loyalty ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub level: TierLevel,
    pub name: String,
    /// Cumulative trading volume (USDT) needed to hold this tier.
    pub required_volume: Decimal,
    /// Badges that must be activated before entering this tier.
    #[serde(default)]
    pub required_badges: Vec<BadgeId>,
    /// Trading fee reduction in percent.
    pub fee_discount_pct: Decimal,
    #[serde(default)]
    pub benefits: Vec<String>,
    /// Whether the tier can be claimed without holding the one below it.
    #[serde(default)]
    pub direct_claim: bool,
}

/// Bonus tier awarded outside the volume ladder (e.g. competition prizes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialTier {
    pub id: String,
    pub name: String,
    /// Additional fee reduction in percent, stacked on top of the ladder tier.
    pub fee_discount_pct: Decimal,
    #[serde(default)]
    pub benefits: Vec<String>,
    /// How the tier is handed out, e.g. "top 3 trading contest".
    #[serde(default)]
    pub acquisition: String,
}
