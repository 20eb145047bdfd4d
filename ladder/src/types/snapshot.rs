use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    BadgeId, BadgeStatus, FeeSchedule, PendingUpgrade, TaskType, TierLevel, TierState, UpgradeKey,
    UpgradeRecord, UserId,
};

/// Result of evaluating a volume and badge set against the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Highest level whose volume and badge prerequisites are met; `0` for none.
    pub current_tier_level: TierLevel,
    pub max_level: TierLevel,
    pub volume: Decimal,
    /// The first locked level, absent at the top of the ladder.
    pub next_tier: Option<NextTierProgress>,
    pub fee_schedule: FeeSchedule,
}

/// Progress toward the first level not yet reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTierProgress {
    pub level: TierLevel,
    pub name: String,
    pub required_volume: Decimal,
    /// `min(100, floor(volume / required_volume * 100))`.
    pub progress_percentage: u8,
    pub volume_shortfall: Decimal,
    pub required_badges: Vec<BadgeId>,
    pub missing_badges: Vec<BadgeId>,
    /// Missing badges that are owned and only need activating.
    pub activatable_badges: Vec<BadgeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequirement {
    pub required: Decimal,
    pub current: Decimal,
    pub met: bool,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeRequirement {
    pub required: Vec<BadgeId>,
    pub missing: Vec<BadgeId>,
    pub met: bool,
}

/// Whether the held tier can move one level up right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeEligibility {
    pub tier: TierState,
    /// `None` when no tier is held, at the top of the ladder, or mid-upgrade.
    pub target_level: Option<TierLevel>,
    pub volume: Option<VolumeRequirement>,
    pub badges: Option<BadgeRequirement>,
    pub eligible: bool,
    pub pending: Option<PendingUpgrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResult {
    pub key: UpgradeKey,
    pub from: TierLevel,
    pub to: TierLevel,
    pub name: String,
    /// True when an earlier interrupted attempt was completed.
    pub resumed: bool,
    pub burn_signature: String,
    pub mint_signature: String,
    pub consumed_badges: Vec<BadgeId>,
    pub fee_schedule: FeeSchedule,
    pub benefits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub level: TierLevel,
    pub name: String,
    pub mint_signature: String,
    pub consumed_badges: Vec<BadgeId>,
    pub fee_schedule: FeeSchedule,
    pub benefits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResult {
    pub badge_id: BadgeId,
    pub status: BadgeStatus,
    /// False when the badge was already activated.
    pub changed: bool,
}

/// A catalog badge joined with one user's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeView {
    pub id: BadgeId,
    pub name: String,
    pub tier_level: TierLevel,
    pub task: String,
    pub task_type: TaskType,
    pub status: BadgeStatus,
    pub can_activate: bool,
    /// Required to enter the level above the held tier.
    pub required_for_upgrade: bool,
    pub earned_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Everything the NFT info route shows for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOverview {
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub tier: TierState,
    pub tier_name: Option<String>,
    pub cumulative_volume: Decimal,
    pub special_tiers: Vec<String>,
    /// Benefits of the held tier plus any special tiers.
    pub benefits: Vec<String>,
    /// Discounts of the held tier plus any special tiers.
    pub fee_schedule: FeeSchedule,
    pub progress: ProgressSnapshot,
}

/// Fee saved by a user's discounts over their cumulative volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSavings {
    pub user_id: UserId,
    /// Issued tier; `None` without a tier or mid-upgrade.
    pub level: Option<TierLevel>,
    pub tier_name: Option<String>,
    pub cumulative_volume: Decimal,
    pub fee_schedule: FeeSchedule,
    /// `cumulative_volume * (base rate - effective rate)` at the current discount.
    pub total_saved: Decimal,
}

/// Completed claims and upgrades, plus the one in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHistory {
    pub user_id: UserId,
    /// Oldest first.
    pub completed: Vec<UpgradeRecord>,
    pub pending: Option<PendingUpgrade>,
    /// Whether calling `request_upgrade` again would resume `pending`.
    pub can_retry: bool,
    pub max_retries: u32,
}
