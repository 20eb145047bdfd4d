use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{BadgeId, TierLevel};

#[derive(Error, Debug)]
pub enum LadderError {
    #[error("invalid tier transition: {from} -> {to}")]
    InvalidTierTransition { from: TierLevel, to: TierLevel },

    #[error("tier {level} out of range (max {max})")]
    TierOutOfRange { level: TierLevel, max: TierLevel },

    #[error("insufficient volume: {current} of {required} USDT, short {shortfall}")]
    InsufficientVolume {
        required: Decimal,
        current: Decimal,
        shortfall: Decimal,
    },

    #[error("badge requirement unmet, missing {missing:?}")]
    BadgeRequirementUnmet { missing: Vec<BadgeId> },

    #[error("badge {0} not owned")]
    BadgeNotOwned(BadgeId),

    #[error("badge {0} already consumed")]
    BadgeConsumed(BadgeId),

    #[error("unknown badge: {0}")]
    UnknownBadge(BadgeId),

    #[error("unknown special tier: {0}")]
    UnknownSpecialTier(String),

    #[error("upgrade {pending_from} -> {pending_to} already pending")]
    PendingUpgradeConflict {
        pending_from: TierLevel,
        pending_to: TierLevel,
    },

    #[error("no pending upgrade")]
    NoPendingUpgrade,

    #[error("upgrade {key} needs manual reconciliation")]
    ReconciliationRequired { key: String },

    #[error("tier {requested} not held (held: {held})")]
    TierNotHeld { held: String, requested: TierLevel },

    #[error("tier already held: {0}")]
    TierAlreadyHeld(String),

    #[error("tier {0} cannot be claimed directly")]
    ClaimNotPermitted(TierLevel),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("nickname change not allowed before {next_allowed_at}")]
    NicknameCooldown { next_allowed_at: DateTime<Utc> },

    #[error("invalid nickname: {0}")]
    InvalidNickname(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("ledger timeout after {0}ms")]
    LedgerTimeout(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LadderError {
    /// Stable machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LadderError::InvalidTierTransition { .. } => "InvalidTierTransition",
            LadderError::TierOutOfRange { .. } => "TierOutOfRange",
            LadderError::InsufficientVolume { .. } => "InsufficientVolume",
            LadderError::BadgeRequirementUnmet { .. } => "BadgeRequirementUnmet",
            LadderError::BadgeNotOwned(_) => "BadgeNotOwned",
            LadderError::BadgeConsumed(_) => "BadgeConsumed",
            LadderError::UnknownBadge(_) => "UnknownBadge",
            LadderError::UnknownSpecialTier(_) => "UnknownSpecialTier",
            LadderError::PendingUpgradeConflict { .. } => "PendingUpgradeConflict",
            LadderError::NoPendingUpgrade => "NoPendingUpgrade",
            LadderError::ReconciliationRequired { .. } => "ReconciliationRequired",
            LadderError::TierNotHeld { .. } => "TierNotHeld",
            LadderError::TierAlreadyHeld(_) => "TierAlreadyHeld",
            LadderError::ClaimNotPermitted(_) => "ClaimNotPermitted",
            LadderError::InvalidVolume(_) => "InvalidVolume",
            LadderError::NicknameCooldown { .. } => "NicknameCooldown",
            LadderError::InvalidNickname(_) => "InvalidNickname",
            LadderError::Ledger(_) => "LedgerError",
            LadderError::LedgerTimeout(_) => "LedgerTimeout",
            LadderError::Cancelled => "Cancelled",
            LadderError::Catalog(_) => "CatalogError",
            LadderError::Json(_) => "JsonError",
            LadderError::Io(_) => "IoError",
        }
    }

    /// Whether the error is a recoverable, caller-facing business outcome.
    ///
    /// Catalog, JSON and IO failures are the only fatal kinds.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            LadderError::Catalog(_) | LadderError::Json(_) | LadderError::Io(_)
        )
    }

    /// Whether re-invoking the same upgrade may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LadderError::Ledger(_) | LadderError::LedgerTimeout(_) | LadderError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, LadderError>;
