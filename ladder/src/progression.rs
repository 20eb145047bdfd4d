//! Pure progression math: tier evaluation, progress percentage, shortfalls.
//!
//! Nothing here touches user state. The same inputs always produce the same
//! snapshot, so the functions can be re-run at any time.

use std::collections::BTreeSet;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::catalog::Catalog;
use crate::error::{LadderError, Result};
use crate::types::{BadgeId, NextTierProgress, ProgressSnapshot, Tier, TierLevel};

/// Volumes are whole USDT with cent precision.
pub const VOLUME_SCALE: u32 = 2;

/// Validate a volume and truncate it to cent precision.
pub fn normalize_volume(volume: Decimal) -> Result<Decimal> {
    if volume < Decimal::ZERO {
        return Err(LadderError::InvalidVolume(format!("{volume} is negative")));
    }
    Ok(volume.round_dp_with_strategy(VOLUME_SCALE, RoundingStrategy::ToZero))
}

/// `min(100, floor(volume / required * 100))`. A zero requirement is always 100.
pub fn progress_percentage(volume: Decimal, required: Decimal) -> u8 {
    if required <= Decimal::ZERO {
        return 100;
    }
    volume
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|v| v.checked_div(required))
        .map(|pct| pct.floor().min(Decimal::ONE_HUNDRED))
        .and_then(|pct| pct.to_u8())
        // Only an overflowing (huge) volume fails the checked math.
        .unwrap_or(100)
}

/// How much volume is still missing for `required`; zero once met.
pub fn volume_shortfall(volume: Decimal, required: Decimal) -> Decimal {
    (required - volume).max(Decimal::ZERO)
}

/// Evaluate a volume and badge set against the ladder.
///
/// `activated` must include badges already consumed by earlier upgrades, since
/// those still count toward the tiers they unlocked. A level counts when both
/// its volume and its badge prerequisites are met; the walk stops at the first
/// level that does not count.
///
/// # Errors
///
/// `InvalidVolume` for negative volumes, `UnknownBadge` for ids outside the
/// catalog.
pub fn evaluate_progress(
    catalog: &Catalog,
    volume: Decimal,
    owned: &[BadgeId],
    activated: &[BadgeId],
) -> Result<ProgressSnapshot> {
    let volume = normalize_volume(volume)?;
    for id in owned.iter().chain(activated) {
        catalog.badge(*id)?;
    }
    let owned: BTreeSet<BadgeId> = owned.iter().copied().collect();
    let activated: BTreeSet<BadgeId> = activated.iter().copied().collect();

    let mut current: TierLevel = 0;
    let mut next_tier = None;
    for tier in catalog.tiers() {
        let missing = missing_badges(tier, &activated);
        if volume >= tier.required_volume && missing.is_empty() {
            current = tier.level;
            continue;
        }
        next_tier = Some(next_tier_progress(tier, volume, missing, &owned));
        break;
    }

    Ok(ProgressSnapshot {
        current_tier_level: current,
        max_level: catalog.max_level(),
        volume,
        next_tier,
        fee_schedule: catalog.fee_schedule(current, std::iter::empty()),
    })
}

/// Required badges of `tier` not present in `activated`, in catalog order.
pub fn missing_badges(tier: &Tier, activated: &BTreeSet<BadgeId>) -> Vec<BadgeId> {
    tier.required_badges
        .iter()
        .copied()
        .filter(|id| !activated.contains(id))
        .collect()
}

fn next_tier_progress(
    tier: &Tier,
    volume: Decimal,
    missing: Vec<BadgeId>,
    owned: &BTreeSet<BadgeId>,
) -> NextTierProgress {
    let activatable_badges = missing
        .iter()
        .copied()
        .filter(|id| owned.contains(id))
        .collect();
    NextTierProgress {
        level: tier.level,
        name: tier.name.clone(),
        required_volume: tier.required_volume,
        progress_percentage: progress_percentage(volume, tier.required_volume),
        volume_shortfall: volume_shortfall(volume, tier.required_volume),
        required_badges: tier.required_badges.clone(),
        missing_badges: missing,
        activatable_badges,
    }
}
