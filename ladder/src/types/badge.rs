use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TierLevel;

/// Unique identifier for a catalog badge.
pub type BadgeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Automatic,
    Manual,
}

/// Catalog definition of a badge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: BadgeId,
    pub name: String,
    /// Ladder level the badge belongs to.
    pub tier_level: TierLevel,
    /// Task that earns the badge.
    pub task: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub description: String,
}

/// Per-user lifecycle of a badge: `not_earned -> owned -> activated -> consumed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeStatus {
    NotEarned,
    Owned,
    Activated,
    Consumed,
}

impl BadgeStatus {
    pub fn can_activate(self) -> bool {
        self == BadgeStatus::Owned
    }

    pub fn can_consume(self) -> bool {
        self == BadgeStatus::Activated
    }

    /// Activated badges satisfy tier prerequisites; consumed ones already did.
    pub fn satisfies_requirement(self) -> bool {
        matches!(self, BadgeStatus::Activated | BadgeStatus::Consumed)
    }
}

impl std::fmt::Display for BadgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BadgeStatus::NotEarned => write!(f, "not_earned"),
            BadgeStatus::Owned => write!(f, "owned"),
            BadgeStatus::Activated => write!(f, "activated"),
            BadgeStatus::Consumed => write!(f, "consumed"),
        }
    }
}

/// A user's copy of a badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeRecord {
    pub status: BadgeStatus,
    pub earned_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    /// Tier whose upgrade consumed the badge.
    pub consumed_for_level: Option<TierLevel>,
}

impl BadgeRecord {
    pub fn earned(at: DateTime<Utc>) -> Self {
        Self {
            status: BadgeStatus::Owned,
            earned_at: at,
            activated_at: None,
            consumed_at: None,
            consumed_for_level: None,
        }
    }
}
