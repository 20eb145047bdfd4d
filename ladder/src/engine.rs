//! Tier progression engine.
//!
//! Owns the catalog, the per-user store and the token ledger. Every mutation
//! takes the user's writer lock first; reads go through consistent snapshots.
//!
//! An upgrade runs in two ledger steps (burn old, mint new). Before the first
//! step the user moves to `PendingUpgrade`, so a failure between the steps is
//! durable and the same `request_upgrade` call resumes it.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{LadderError, Result};
use crate::ledger::{InMemoryLedger, TokenLedger};
use crate::progression::{self, normalize_volume, volume_shortfall};
use crate::store::ProgressStore;
use crate::types::*;

/// The tier progression engine.
pub struct TierEngine<L = InMemoryLedger> {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    store: ProgressStore,
    ledger: L,
}

impl TierEngine<InMemoryLedger> {
    /// Engine backed by an in-memory ledger.
    pub fn in_memory(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self::new(catalog, config, InMemoryLedger::new())
    }
}

impl<L: TokenLedger> TierEngine<L> {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig, ledger: L) -> Self {
        Self {
            catalog,
            config,
            store: ProgressStore::new(),
            ledger,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub(crate) fn store(&self) -> &ProgressStore {
        &self.store
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Pure evaluation against the catalog; see [`progression::evaluate_progress`].
    pub fn evaluate_progress(
        &self,
        volume: Decimal,
        owned: &[BadgeId],
        activated: &[BadgeId],
    ) -> Result<ProgressSnapshot> {
        progression::evaluate_progress(&self.catalog, volume, owned, activated)
    }

    /// Consistent copy of a user's state.
    pub fn user_progress(&self, user_id: &str) -> UserProgress {
        self.store.snapshot(user_id)
    }

    /// Evaluate a user's own volume and badges.
    pub fn evaluate_user(&self, user_id: &str) -> Result<ProgressSnapshot> {
        let p = self.store.snapshot(user_id);
        self.evaluate_progress(p.cumulative_volume, &p.owned_badges(), &p.qualifying_badges())
    }

    /// Held tier, benefits, fees and progress of one user.
    ///
    /// Benefits and discounts follow the issued tier, so they are suspended
    /// while an upgrade is pending.
    pub fn overview(&self, user_id: &str) -> Result<UserOverview> {
        let p = self.store.snapshot(user_id);
        let progress =
            self.evaluate_progress(p.cumulative_volume, &p.owned_badges(), &p.qualifying_badges())?;
        let held = p.tier.held_level().unwrap_or(0);
        Ok(UserOverview {
            tier_name: self.catalog.tier(held).map(|t| t.name.clone()),
            benefits: self.catalog.benefits(held, &p.special_tiers),
            fee_schedule: self.catalog.fee_schedule(held, &p.special_tiers),
            special_tiers: p.special_tiers.iter().cloned().collect(),
            user_id: p.user_id,
            nickname: p.nickname,
            tier: p.tier,
            cumulative_volume: p.cumulative_volume,
            progress,
        })
    }

    /// Fees saved over the user's whole volume at the held tier's discount.
    pub fn fee_savings(&self, user_id: &str) -> FeeSavings {
        let p = self.store.snapshot(user_id);
        let level = p.tier.held_level();
        let fee_schedule = self
            .catalog
            .fee_schedule(level.unwrap_or(0), &p.special_tiers);
        FeeSavings {
            tier_name: level
                .and_then(|l| self.catalog.tier(l))
                .map(|t| t.name.clone()),
            total_saved: fee_schedule.fee_saved(p.cumulative_volume),
            user_id: p.user_id,
            level,
            cumulative_volume: p.cumulative_volume,
            fee_schedule,
        }
    }

    /// Completed transitions and the pending upgrade, if any.
    pub fn upgrade_history(&self, user_id: &str) -> UpgradeHistory {
        let p = self.store.snapshot(user_id);
        let pending = p.tier.pending().cloned();
        let can_retry = pending.as_ref().is_some_and(|pending| {
            !pending.needs_reconciliation
                && pending.attempts <= self.config.max_upgrade_retries
                && !self.is_stale(pending, Utc::now())
        });
        UpgradeHistory {
            user_id: p.user_id,
            completed: p.upgrades,
            pending,
            can_retry,
            max_retries: self.config.max_upgrade_retries,
        }
    }

    /// Requirements for the next step from the held tier: claiming level 1
    /// from no tier, or upgrading one level otherwise.
    pub fn upgrade_eligibility(&self, user_id: &str) -> UpgradeEligibility {
        let p = self.store.snapshot(user_id);
        let from = match &p.tier {
            TierState::NoTier => Some(0),
            TierState::Active { level } if *level < self.catalog.max_level() => Some(*level),
            _ => None,
        };
        let pending = p.tier.pending().cloned();
        match from {
            Some(from) => {
                let to = from + 1;
                let (volume, badges) = self.requirement_check(&p, from, to);
                UpgradeEligibility {
                    eligible: volume.met && badges.met,
                    target_level: Some(to),
                    volume: Some(volume),
                    badges: Some(badges),
                    tier: p.tier,
                    pending,
                }
            }
            None => UpgradeEligibility {
                tier: p.tier,
                target_level: None,
                volume: None,
                badges: None,
                eligible: false,
                pending,
            },
        }
    }

    /// Catalog badges joined with the user's status.
    pub fn badge_collection(&self, user_id: &str) -> Vec<BadgeView> {
        let p = self.store.snapshot(user_id);
        let next_level = match &p.tier {
            TierState::NoTier => 1,
            TierState::Active { level } => level.saturating_add(1),
            TierState::PendingUpgrade(pending) => pending.to,
        };
        let required: BTreeSet<BadgeId> = self
            .catalog
            .tier(next_level)
            .map(|t| t.required_badges.iter().copied().collect())
            .unwrap_or_default();

        self.catalog
            .badges()
            .iter()
            .map(|b| {
                let record = p.badges.get(&b.id);
                let status = record.map(|r| r.status).unwrap_or(BadgeStatus::NotEarned);
                BadgeView {
                    id: b.id,
                    name: b.name.clone(),
                    tier_level: b.tier_level,
                    task: b.task.clone(),
                    task_type: b.task_type,
                    status,
                    can_activate: status.can_activate(),
                    required_for_upgrade: required.contains(&b.id),
                    earned_at: record.map(|r| r.earned_at),
                    activated_at: record.and_then(|r| r.activated_at),
                    consumed_at: record.and_then(|r| r.consumed_at),
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    /// Add traded volume. Returns the new cumulative volume.
    pub async fn record_volume(&self, user_id: &str, delta: Decimal) -> Result<Decimal> {
        let delta = normalize_volume(delta)?;
        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        p.cumulative_volume = p
            .cumulative_volume
            .checked_add(delta)
            .ok_or_else(|| LadderError::InvalidVolume(format!("{delta} overflows cumulative volume")))?;
        let total = p.cumulative_volume;
        guard.commit(p);
        debug!(user_id, %delta, %total, "volume recorded");
        Ok(total)
    }

    /// Mark a badge's task as completed: `not_earned -> owned`.
    ///
    /// Badges already earned keep their status.
    pub async fn award_badge(&self, user_id: &str, badge_id: BadgeId) -> Result<BadgeStatus> {
        self.catalog.badge(badge_id)?;
        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        if let Some(record) = p.badges.get(&badge_id) {
            return Ok(record.status);
        }
        p.badges.insert(badge_id, BadgeRecord::earned(Utc::now()));
        guard.commit(p);
        info!(user_id, badge_id, "badge earned");
        Ok(BadgeStatus::Owned)
    }

    /// Grant a special tier. Granting twice is a no-op.
    pub async fn award_special_tier(&self, user_id: &str, special_id: &str) -> Result<FeeSchedule> {
        self.catalog.special_tier(special_id)?;
        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        if p.special_tiers.insert(special_id.to_string()) {
            info!(user_id, special_id, "special tier awarded");
        }
        let fee = self
            .catalog
            .fee_schedule(p.tier.held_level().unwrap_or(0), &p.special_tiers);
        guard.commit(p);
        Ok(fee)
    }

    // ---------------------------------------------------------------------
    // Badge lifecycle
    // ---------------------------------------------------------------------

    /// `owned -> activated`. Activating an activated badge changes nothing.
    pub async fn activate_badge(&self, user_id: &str, badge_id: BadgeId) -> Result<ActivateResult> {
        self.catalog.badge(badge_id)?;
        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        let record = p
            .badges
            .get_mut(&badge_id)
            .ok_or(LadderError::BadgeNotOwned(badge_id))?;
        match record.status {
            BadgeStatus::Activated => Ok(ActivateResult {
                badge_id,
                status: BadgeStatus::Activated,
                changed: false,
            }),
            BadgeStatus::Consumed => Err(LadderError::BadgeConsumed(badge_id)),
            BadgeStatus::NotEarned => Err(LadderError::BadgeNotOwned(badge_id)),
            BadgeStatus::Owned => {
                record.status = BadgeStatus::Activated;
                record.activated_at = Some(Utc::now());
                guard.commit(p);
                info!(user_id, badge_id, "badge activated");
                Ok(ActivateResult {
                    badge_id,
                    status: BadgeStatus::Activated,
                    changed: true,
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Tier transitions
    // ---------------------------------------------------------------------

    /// Enter the ladder without a prior tier.
    pub async fn claim_tier(&self, user_id: &str, level: TierLevel) -> Result<ClaimResult> {
        self.claim_tier_cancellable(user_id, level, &CancellationToken::new())
            .await
    }

    /// [`Self::claim_tier`] that gives up when `cancel` fires.
    pub async fn claim_tier_cancellable(
        &self,
        user_id: &str,
        level: TierLevel,
        cancel: &CancellationToken,
    ) -> Result<ClaimResult> {
        let max = self.catalog.max_level();
        let tier = self
            .catalog
            .tier(level)
            .ok_or(LadderError::TierOutOfRange { level, max })?;
        if level != 1 && !tier.direct_claim {
            return Err(LadderError::ClaimNotPermitted(level));
        }

        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        if p.tier != TierState::NoTier {
            return Err(LadderError::TierAlreadyHeld(p.tier.to_string()));
        }
        self.validate_requirements(&p, 0, level)?;

        let key = UpgradeKey::new(user_id, 0, level);
        let mint_signature = self
            .guarded(self.ledger.mint(user_id, level, &key), cancel)
            .await?;

        let badges = self.catalog.required_badges_between(0, level);
        let now = Utc::now();
        consume_badges(&mut p, &badges, level, now);
        p.tier = TierState::Active { level };
        p.upgrades.push(UpgradeRecord {
            key,
            from: 0,
            to: level,
            burn_signature: None,
            mint_signature: mint_signature.clone(),
            consumed_badges: badges.clone(),
            completed_at: now,
        });
        let fee_schedule = self.catalog.fee_schedule(level, &p.special_tiers);
        let benefits = self.catalog.benefits(level, &p.special_tiers);
        guard.commit(p);
        info!(user_id, level, %mint_signature, "tier claimed");

        Ok(ClaimResult {
            level,
            name: tier.name.clone(),
            mint_signature,
            consumed_badges: badges,
            fee_schedule,
            benefits,
        })
    }

    /// Move the held tier from `from` to `to`.
    ///
    /// Re-invoking with the same arguments while the upgrade is pending resumes
    /// it from the last completed ledger step without validating again.
    pub async fn request_upgrade(
        &self,
        user_id: &str,
        from: TierLevel,
        to: TierLevel,
    ) -> Result<UpgradeResult> {
        self.request_upgrade_cancellable(user_id, from, to, &CancellationToken::new())
            .await
    }

    /// [`Self::request_upgrade`] that gives up when `cancel` fires.
    ///
    /// Cancellation and ledger timeouts leave the upgrade pending; call again
    /// with the same arguments to resume.
    pub async fn request_upgrade_cancellable(
        &self,
        user_id: &str,
        from: TierLevel,
        to: TierLevel,
        cancel: &CancellationToken,
    ) -> Result<UpgradeResult> {
        if to <= from {
            return Err(LadderError::InvalidTierTransition { from, to });
        }
        let max = self.catalog.max_level();
        if to > max {
            return Err(LadderError::TierOutOfRange { level: to, max });
        }

        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        let key = UpgradeKey::new(user_id, from, to);
        let now = Utc::now();

        let (mut pending, resumed) = match p.tier.clone() {
            TierState::PendingUpgrade(mut pending) if pending.key == key => {
                if pending.needs_reconciliation {
                    return Err(LadderError::ReconciliationRequired { key: key.to_string() });
                }
                if pending.attempts > self.config.max_upgrade_retries || self.is_stale(&pending, now) {
                    pending.needs_reconciliation = true;
                    warn!(
                        user_id,
                        %key,
                        attempts = pending.attempts,
                        started_at = %pending.started_at,
                        "pending upgrade handed to reconciliation"
                    );
                    p.tier = TierState::PendingUpgrade(pending);
                    guard.commit(p);
                    return Err(LadderError::ReconciliationRequired { key: key.to_string() });
                }
                info!(user_id, %key, attempt = pending.attempts + 1, "resuming pending upgrade");
                (pending, true)
            }
            TierState::PendingUpgrade(pending) => {
                return Err(LadderError::PendingUpgradeConflict {
                    pending_from: pending.from,
                    pending_to: pending.to,
                });
            }
            TierState::Active { level } if level == from => {
                self.validate_requirements(&p, from, to)?;
                info!(user_id, %key, "upgrade initiated");
                let pending = PendingUpgrade {
                    key: key.clone(),
                    from,
                    to,
                    started_at: now,
                    burn_signature: None,
                    attempts: 0,
                    badges: self.catalog.required_badges_between(from, to),
                    needs_reconciliation: false,
                };
                (pending, false)
            }
            other => {
                return Err(LadderError::TierNotHeld {
                    held: other.to_string(),
                    requested: from,
                });
            }
        };

        // Publish the pending state (old tier revoked) before touching the ledger.
        pending.attempts += 1;
        p.tier = TierState::PendingUpgrade(pending.clone());
        guard.commit(p.clone());

        let burn_signature = match pending.burn_signature.clone() {
            Some(sig) => sig,
            None => {
                let sig = self
                    .guarded(self.ledger.burn(user_id, from, &key), cancel)
                    .await
                    .inspect_err(|e| warn!(user_id, %key, error = %e, "burn failed, upgrade stays pending"))?;
                pending.burn_signature = Some(sig.clone());
                p.tier = TierState::PendingUpgrade(pending.clone());
                guard.commit(p.clone());
                debug!(user_id, %key, %sig, "old tier burned");
                sig
            }
        };

        let mint_signature = self
            .guarded(self.ledger.mint(user_id, to, &key), cancel)
            .await
            .inspect_err(|e| warn!(user_id, %key, error = %e, "mint failed, upgrade stays pending"))?;

        let now = Utc::now();
        consume_badges(&mut p, &pending.badges, to, now);
        p.tier = TierState::Active { level: to };
        p.upgrades.push(UpgradeRecord {
            key: key.clone(),
            from,
            to,
            burn_signature: Some(burn_signature.clone()),
            mint_signature: mint_signature.clone(),
            consumed_badges: pending.badges.clone(),
            completed_at: now,
        });
        let fee_schedule = self.catalog.fee_schedule(to, &p.special_tiers);
        let benefits = self.catalog.benefits(to, &p.special_tiers);
        guard.commit(p);
        info!(user_id, %key, resumed, %mint_signature, "upgrade completed");

        Ok(UpgradeResult {
            name: self
                .catalog
                .tier(to)
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            key,
            from,
            to,
            resumed,
            burn_signature,
            mint_signature,
            consumed_badges: pending.badges,
            fee_schedule,
            benefits,
        })
    }

    /// Administrative exit from `PendingUpgrade`: restore the old tier.
    ///
    /// If the old token was already burned it is minted again, and the upgrade
    /// key is released so the same transition can be requested afresh.
    /// Prerequisite badges stay activated.
    pub async fn rollback_upgrade(&self, user_id: &str) -> Result<TierState> {
        let guard = self.store.lock(user_id).await;
        let mut p = guard.read();
        let pending = p
            .tier
            .pending()
            .cloned()
            .ok_or(LadderError::NoPendingUpgrade)?;

        let cancel = CancellationToken::new();
        let reverse_key = UpgradeKey::new(user_id, pending.to, pending.from);
        if pending.burn_signature.is_some() {
            let sig = self
                .guarded(self.ledger.mint(user_id, pending.from, &reverse_key), &cancel)
                .await?;
            debug!(user_id, key = %reverse_key, %sig, "old tier reissued");
        }
        self.guarded(self.ledger.release(&pending.key), &cancel).await?;

        p.tier = TierState::Active {
            level: pending.from,
        };
        guard.commit(p.clone());
        warn!(user_id, key = %pending.key, "pending upgrade rolled back");

        // The rollback is committed; a stuck reverse key only affects a later rollback.
        if let Err(e) = self.guarded(self.ledger.release(&reverse_key), &cancel).await {
            warn!(user_id, key = %reverse_key, error = %e, "failed to release reissue key");
        }
        Ok(p.tier)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    pub(crate) fn is_stale(&self, pending: &PendingUpgrade, now: DateTime<Utc>) -> bool {
        let timeout = chrono::Duration::milliseconds(
            i64::try_from(self.config.pending_timeout_ms).unwrap_or(i64::MAX),
        );
        now - pending.started_at > timeout
    }

    /// Volume and badge requirements for moving from `from` to `to`.
    fn requirement_check(
        &self,
        p: &UserProgress,
        from: TierLevel,
        to: TierLevel,
    ) -> (VolumeRequirement, BadgeRequirement) {
        let required_volume = self
            .catalog
            .tier(to)
            .map(|t| t.required_volume)
            .unwrap_or(Decimal::MAX);
        let volume = VolumeRequirement {
            required: required_volume,
            current: p.cumulative_volume,
            met: p.cumulative_volume >= required_volume,
            shortfall: volume_shortfall(p.cumulative_volume, required_volume),
        };

        let required = self.catalog.required_badges_between(from, to);
        let missing: Vec<BadgeId> = required
            .iter()
            .copied()
            .filter(|id| p.badge_status(*id) != BadgeStatus::Activated)
            .collect();
        let badges = BadgeRequirement {
            met: missing.is_empty(),
            required,
            missing,
        };
        (volume, badges)
    }

    /// Volume is checked, and reported, before badges.
    fn validate_requirements(&self, p: &UserProgress, from: TierLevel, to: TierLevel) -> Result<()> {
        let (volume, badges) = self.requirement_check(p, from, to);
        if !volume.met {
            return Err(LadderError::InsufficientVolume {
                required: volume.required,
                current: volume.current,
                shortfall: volume.shortfall,
            });
        }
        if !badges.met {
            return Err(LadderError::BadgeRequirementUnmet {
                missing: badges.missing,
            });
        }
        Ok(())
    }

    /// Run a ledger call bounded by the configured timeout and `cancel`.
    async fn guarded<F, T>(&self, call: F, cancel: &CancellationToken) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_millis(self.config.ledger_timeout_ms);
        tokio::select! {
            res = time::timeout(limit, call) => {
                res.map_err(|_| LadderError::LedgerTimeout(self.config.ledger_timeout_ms))?
            }
            _ = cancel.cancelled() => Err(LadderError::Cancelled),
        }
    }
}

fn consume_badges(p: &mut UserProgress, badges: &[BadgeId], level: TierLevel, now: DateTime<Utc>) {
    for id in badges {
        if let Some(record) = p.badges.get_mut(id) {
            if record.status.can_consume() {
                record.status = BadgeStatus::Consumed;
                record.consumed_at = Some(now);
                record.consumed_for_level = Some(level);
            }
        }
    }
}
