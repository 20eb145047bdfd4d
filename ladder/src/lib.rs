pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod profile;
pub mod progression;
pub mod reconcile;
pub mod store;
pub mod types;

// ---- Top-level re-exports for ergonomic usage ----

// Engine + catalog + config
pub use catalog::Catalog;
pub use config::EngineConfig;
pub use engine::TierEngine;
pub use error::{LadderError, Result};

// Ledger seam
pub use ledger::{InMemoryLedger, LedgerEntry, LedgerOp, TokenLedger};

// Background reconciliation
pub use reconcile::spawn_reconciler;

// Profile
pub use profile::NicknameChange;

// Catalog types
pub use types::{Badge, BadgeId, SpecialTier, TaskType, Tier, TierLevel};

// User state
pub use types::{
    BadgeRecord, BadgeStatus, PendingUpgrade, TierState, UpgradeKey, UpgradeRecord, UserId,
    UserProgress,
};

// Fees
pub use types::{FeeSavings, FeeSchedule, FeeTierRow};

// Views + results
pub use types::{
    ActivateResult, BadgeRequirement, BadgeView, ClaimResult, NextTierProgress, ProgressSnapshot,
    UpgradeEligibility, UpgradeHistory, UpgradeResult, UserOverview, VolumeRequirement,
};

// Response envelope
pub use types::ApiResponse;
