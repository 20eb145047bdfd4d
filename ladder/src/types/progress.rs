use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BadgeId, BadgeRecord, BadgeStatus, TierLevel};

/// Opaque user identifier as handed over by the auth layer.
pub type UserId = String;

/// Deterministic idempotency key of an upgrade: `upgrade:{user}:{from}:{to}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeKey(String);

impl UpgradeKey {
    pub fn new(user_id: &str, from: TierLevel, to: TierLevel) -> Self {
        Self(format!("upgrade:{user_id}:{from}:{to}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UpgradeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upgrade whose old tier has been revoked but whose new tier is not issued yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpgrade {
    pub key: UpgradeKey,
    pub from: TierLevel,
    pub to: TierLevel,
    pub started_at: DateTime<Utc>,
    /// Set once the old token is burned; a resume skips the burn step.
    pub burn_signature: Option<String>,
    /// Number of executions so far, including the first.
    pub attempts: u32,
    /// Prerequisite badges validated at initiation, consumed on completion.
    pub badges: Vec<BadgeId>,
    pub needs_reconciliation: bool,
}

/// The tier a user currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TierState {
    NoTier,
    Active { level: TierLevel },
    PendingUpgrade(PendingUpgrade),
}

impl TierState {
    /// Level of an issued tier; `None` while no tier is held or mid-upgrade.
    pub fn held_level(&self) -> Option<TierLevel> {
        match self {
            TierState::Active { level } => Some(*level),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&PendingUpgrade> {
        match self {
            TierState::PendingUpgrade(p) => Some(p),
            _ => None,
        }
    }
}

impl std::fmt::Display for TierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierState::NoTier => write!(f, "no tier"),
            TierState::Active { level } => write!(f, "tier {level}"),
            TierState::PendingUpgrade(p) => write!(f, "pending upgrade {} -> {}", p.from, p.to),
        }
    }
}

/// A completed claim (`from == 0`) or upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRecord {
    pub key: UpgradeKey,
    pub from: TierLevel,
    pub to: TierLevel,
    pub burn_signature: Option<String>,
    pub mint_signature: String,
    pub consumed_badges: Vec<BadgeId>,
    pub completed_at: DateTime<Utc>,
}

/// All mutable state of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: UserId,
    /// Non-decreasing cumulative trading volume in USDT.
    pub cumulative_volume: Decimal,
    pub badges: BTreeMap<BadgeId, BadgeRecord>,
    pub tier: TierState,
    pub special_tiers: BTreeSet<String>,
    pub nickname: Option<String>,
    pub nickname_changed_at: Option<DateTime<Utc>>,
    pub upgrades: Vec<UpgradeRecord>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            cumulative_volume: Decimal::ZERO,
            badges: BTreeMap::new(),
            tier: TierState::NoTier,
            special_tiers: BTreeSet::new(),
            nickname: None,
            nickname_changed_at: None,
            upgrades: Vec::new(),
        }
    }

    pub fn badge_status(&self, id: BadgeId) -> BadgeStatus {
        self.badges
            .get(&id)
            .map(|r| r.status)
            .unwrap_or(BadgeStatus::NotEarned)
    }

    /// Badges in `owned` status.
    pub fn owned_badges(&self) -> Vec<BadgeId> {
        self.badges_with(|s| s == BadgeStatus::Owned)
    }

    /// Badges that satisfy tier prerequisites (activated or already consumed).
    pub fn qualifying_badges(&self) -> Vec<BadgeId> {
        self.badges_with(BadgeStatus::satisfies_requirement)
    }

    fn badges_with(&self, pred: impl Fn(BadgeStatus) -> bool) -> Vec<BadgeId> {
        self.badges
            .iter()
            .filter(|(_, r)| pred(r.status))
            .map(|(id, _)| *id)
            .collect()
    }
}
