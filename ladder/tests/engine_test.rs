//! Integration tests for tier claims, upgrades and their failure paths.
//!
//! The ladder used here is small: tier 1 at 50k, tier 2 at 100k (badge 1),
//! tier 3 at 500k (badges 2 and 3). A scripted ledger injects failures and
//! stalls into the mint and burn steps.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use ladder::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedLedger {
    inner: InMemoryLedger,
    burn_failures: AtomicU32,
    mint_failures: AtomicU32,
    stall_mint: AtomicBool,
}

impl ScriptedLedger {
    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn ops(&self, op: LedgerOp) -> usize {
        self.inner.entries().iter().filter(|e| e.op == op).count()
    }
}

impl TokenLedger for ScriptedLedger {
    fn burn(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send {
        let fail = Self::take_failure(&self.burn_failures);
        let call = (!fail).then(|| self.inner.burn(user_id, level, key));
        async move {
            match call {
                Some(call) => call.await,
                None => Err(LadderError::Ledger("burn rejected".into())),
            }
        }
    }

    fn mint(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send {
        let stall = self.stall_mint.load(Ordering::SeqCst);
        let fail = !stall && Self::take_failure(&self.mint_failures);
        let call = (!stall && !fail).then(|| self.inner.mint(user_id, level, key));
        async move {
            match call {
                Some(call) => call.await,
                None if stall => std::future::pending().await,
                None => Err(LadderError::Ledger("mint rejected".into())),
            }
        }
    }

    fn release(&self, key: &UpgradeKey) -> impl Future<Output = Result<()>> + Send {
        self.inner.release(key)
    }
}

fn tier(level: TierLevel, volume: Decimal, badges: Vec<BadgeId>) -> Tier {
    Tier {
        level,
        name: format!("Tier {level}"),
        required_volume: volume,
        required_badges: badges,
        fee_discount_pct: Decimal::from(level) * dec!(5),
        benefits: vec![format!("benefit {level}")],
        direct_claim: level == 1,
    }
}

fn badge(id: BadgeId, level: TierLevel) -> Badge {
    Badge {
        id,
        name: format!("Badge {id}"),
        tier_level: level,
        task: format!("task {id}"),
        task_type: TaskType::Manual,
        description: String::new(),
    }
}

fn catalog() -> Arc<Catalog> {
    let special = SpecialTier {
        id: "contest-winner".into(),
        name: "Contest Winner".into(),
        fee_discount_pct: dec!(5),
        benefits: vec!["winner frame".into()],
        acquisition: "top 3 trading contest".into(),
    };
    Arc::new(
        Catalog::new(
            dec!(0.0025),
            vec![
                tier(1, dec!(50000), vec![]),
                tier(2, dec!(100000), vec![1]),
                tier(3, dec!(500000), vec![2, 3]),
            ],
            vec![special],
            vec![badge(1, 2), badge(2, 3), badge(3, 3)],
        )
        .unwrap(),
    )
}

fn engine() -> TierEngine<ScriptedLedger> {
    TierEngine::new(catalog(), EngineConfig::default(), ScriptedLedger::default())
}

async fn earn_and_activate<L: TokenLedger>(e: &TierEngine<L>, user: &str, ids: &[BadgeId]) {
    for id in ids {
        e.award_badge(user, *id).await.unwrap();
        e.activate_badge(user, *id).await.unwrap();
    }
}

/// User holding tier 1 with enough volume and badges to move to tier 2.
async fn ready_for_tier_two<L: TokenLedger>(e: &TierEngine<L>, user: &str) {
    e.record_volume(user, dec!(125000)).await.unwrap();
    earn_and_activate(e, user, &[1]).await;
    e.claim_tier(user, 1).await.unwrap();
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_claim_then_read_back() {
    let e = engine();
    e.record_volume("u-1", dec!(60000)).await.unwrap();

    let claim = e.claim_tier("u-1", 1).await.unwrap();
    assert_eq!(claim.level, 1);
    assert_eq!(claim.fee_schedule.tier_discount_pct, dec!(5));
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 1 });
    assert_eq!(e.ledger().ops(LedgerOp::Mint), 1);
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 0);

    let record = &e.user_progress("u-1").upgrades[0];
    assert_eq!(record.key.as_str(), "upgrade:u-1:0:1");
    assert!(record.burn_signature.is_none());
}

#[tokio::test]
async fn test_claim_rejections() {
    let e = engine();
    let err = e.claim_tier("u-1", 1).await.unwrap_err();
    assert!(matches!(err, LadderError::InsufficientVolume { .. }));

    let err = e.claim_tier("u-1", 2).await.unwrap_err();
    assert!(matches!(err, LadderError::ClaimNotPermitted(2)));

    let err = e.claim_tier("u-1", 9).await.unwrap_err();
    assert!(matches!(err, LadderError::TierOutOfRange { level: 9, max: 3 }));

    e.record_volume("u-1", dec!(50000)).await.unwrap();
    e.claim_tier("u-1", 1).await.unwrap();
    let err = e.claim_tier("u-1", 1).await.unwrap_err();
    assert!(matches!(err, LadderError::TierAlreadyHeld(_)));
}

// ---------------------------------------------------------------------------
// Upgrade validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_upgrade_reports_volume_shortfall() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.request_upgrade("u-1", 1, 2).await.unwrap();
    earn_and_activate(&e, "u-1", &[2, 3]).await;

    let err = e.request_upgrade("u-1", 2, 3).await.unwrap_err();
    match err {
        LadderError::InsufficientVolume {
            required,
            current,
            shortfall,
        } => {
            assert_eq!(required, dec!(500000));
            assert_eq!(current, dec!(125000));
            assert_eq!(shortfall, dec!(375000));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 2 });
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 1);
}

#[tokio::test]
async fn test_upgrade_requires_activated_badges() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.request_upgrade("u-1", 1, 2).await.unwrap();
    e.record_volume("u-1", dec!(500000)).await.unwrap();
    e.award_badge("u-1", 2).await.unwrap();
    e.award_badge("u-1", 3).await.unwrap();
    e.activate_badge("u-1", 2).await.unwrap();

    let err = e.request_upgrade("u-1", 2, 3).await.unwrap_err();
    match err {
        LadderError::BadgeRequirementUnmet { missing } => assert_eq!(missing, vec![3]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_upgrade_transition_errors() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;

    assert!(matches!(
        e.request_upgrade("u-1", 2, 2).await,
        Err(LadderError::InvalidTierTransition { from: 2, to: 2 })
    ));
    assert!(matches!(
        e.request_upgrade("u-1", 3, 1).await,
        Err(LadderError::InvalidTierTransition { from: 3, to: 1 })
    ));
    assert!(matches!(
        e.request_upgrade("u-1", 1, 4).await,
        Err(LadderError::TierOutOfRange { level: 4, max: 3 })
    ));
    assert!(matches!(
        e.request_upgrade("u-1", 2, 3).await,
        Err(LadderError::TierNotHeld { requested: 2, .. })
    ));
    assert!(matches!(
        e.request_upgrade("u-2", 1, 2).await,
        Err(LadderError::TierNotHeld { requested: 1, .. })
    ));
}

// ---------------------------------------------------------------------------
// Upgrade completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_upgrade_consumes_badges_and_keeps_progress() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;

    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert_eq!(up.key.as_str(), "upgrade:u-1:1:2");
    assert!(!up.resumed);
    assert_eq!(up.consumed_badges, vec![1]);
    assert_eq!(up.fee_schedule.tier_discount_pct, dec!(10));

    let p = e.user_progress("u-1");
    assert_eq!(p.tier, TierState::Active { level: 2 });
    assert_eq!(p.badge_status(1), BadgeStatus::Consumed);
    assert_eq!(p.badges[&1].consumed_for_level, Some(2));

    // Consumed badges still count for the tier they unlocked.
    let snap = e.evaluate_user("u-1").unwrap();
    assert_eq!(snap.current_tier_level, 2);
    assert_eq!(snap.next_tier.unwrap().missing_badges, vec![2, 3]);

    assert!(matches!(
        e.activate_badge("u-1", 1).await,
        Err(LadderError::BadgeConsumed(1))
    ));
}

#[tokio::test]
async fn test_skip_level_upgrade_needs_every_intermediate_badge() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.record_volume("u-1", dec!(400000)).await.unwrap();
    e.award_badge("u-1", 2).await.unwrap();
    e.activate_badge("u-1", 2).await.unwrap();

    let err = e.request_upgrade("u-1", 1, 3).await.unwrap_err();
    assert!(matches!(err, LadderError::BadgeRequirementUnmet { ref missing } if missing == &vec![3]));

    earn_and_activate(&e, "u-1", &[3]).await;
    let up = e.request_upgrade("u-1", 1, 3).await.unwrap();
    assert_eq!(up.consumed_badges, vec![1, 2, 3]);
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 3 });
    assert!(e.upgrade_eligibility("u-1").target_level.is_none());
}

#[tokio::test]
async fn test_special_tier_stacks_on_held_tier() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;

    let fee = e.award_special_tier("u-1", "contest-winner").await.unwrap();
    assert_eq!(fee.total_discount_pct, dec!(10));
    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert_eq!(up.fee_schedule.total_discount_pct, dec!(15));
    assert!(up.benefits.contains(&"winner frame".to_string()));

    assert!(matches!(
        e.award_special_tier("u-1", "nope").await,
        Err(LadderError::UnknownSpecialTier(_))
    ));
}

// ---------------------------------------------------------------------------
// Partial failure and resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_mint_leaves_pending_and_resume_skips_burn() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);

    let err = e.request_upgrade("u-1", 1, 2).await.unwrap_err();
    assert!(err.is_retryable());

    let pending = e.user_progress("u-1").tier.pending().cloned().unwrap();
    assert_eq!((pending.from, pending.to), (1, 2));
    assert!(pending.burn_signature.is_some());
    assert_eq!(pending.attempts, 1);
    assert_eq!(e.user_progress("u-1").badge_status(1), BadgeStatus::Activated);

    // Benefits are suspended while the upgrade is pending.
    let overview = e.overview("u-1").unwrap();
    assert!(overview.benefits.is_empty());
    assert_eq!(overview.fee_schedule.total_discount_pct, Decimal::ZERO);

    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert!(up.resumed);
    assert_eq!(Some(up.burn_signature), pending.burn_signature);
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 1);
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 2 });
}

#[tokio::test]
async fn test_failed_burn_is_retried_on_resume() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().burn_failures.store(1, Ordering::SeqCst);

    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());
    let pending = e.user_progress("u-1").tier.pending().cloned().unwrap();
    assert!(pending.burn_signature.is_none());

    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert!(up.resumed);
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 1);
}

#[tokio::test]
async fn test_resume_does_not_revalidate() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    // The validated badge snapshot is consumed on completion.
    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert_eq!(up.consumed_badges, vec![1]);
    assert_eq!(e.user_progress("u-1").badge_status(1), BadgeStatus::Consumed);
}

#[tokio::test]
async fn test_other_transition_while_pending_conflicts() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    let err = e.request_upgrade("u-1", 1, 3).await.unwrap_err();
    assert!(matches!(
        err,
        LadderError::PendingUpgradeConflict {
            pending_from: 1,
            pending_to: 2
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_ledger_times_out() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().stall_mint.store(true, Ordering::SeqCst);

    let err = e.request_upgrade("u-1", 1, 2).await.unwrap_err();
    assert!(matches!(err, LadderError::LedgerTimeout(30_000)));
    assert!(e.user_progress("u-1").tier.pending().is_some());

    e.ledger().stall_mint.store(false, Ordering::SeqCst);
    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert!(up.resumed);
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 1);
}

#[tokio::test]
async fn test_cancelled_upgrade_stays_pending() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().stall_mint.store(true, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = e
        .request_upgrade_cancellable("u-1", 1, 2, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LadderError::Cancelled));
    assert!(e.user_progress("u-1").tier.pending().is_some());
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retry_exhaustion_requires_reconciliation() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(u32::MAX, Ordering::SeqCst);

    // One initial attempt plus three retries.
    for _ in 0..4 {
        assert!(matches!(
            e.request_upgrade("u-1", 1, 2).await,
            Err(LadderError::Ledger(_))
        ));
    }
    let err = e.request_upgrade("u-1", 1, 2).await.unwrap_err();
    assert!(matches!(err, LadderError::ReconciliationRequired { ref key } if key == "upgrade:u-1:1:2"));
    assert!(e.user_progress("u-1").tier.pending().unwrap().needs_reconciliation);

    // Flagged upgrades refuse further attempts even once the ledger recovers.
    e.ledger().mint_failures.store(0, Ordering::SeqCst);
    assert!(matches!(
        e.request_upgrade("u-1", 1, 2).await,
        Err(LadderError::ReconciliationRequired { .. })
    ));
}

#[tokio::test]
async fn test_stale_pending_is_flagged_by_sweep() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    ready_for_tier_two(&e, "u-2").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    let now = Utc::now();
    assert!(e.stale_pending(now).is_empty());
    assert!(e.flag_stale_pending(now).await.is_empty());

    let later = now + Duration::minutes(11);
    assert_eq!(e.stale_pending(later).len(), 1);
    let flagged = e.flag_stale_pending(later).await;
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].key.as_str(), "upgrade:u-1:1:2");
    assert!(e.flag_stale_pending(later).await.is_empty());

    assert!(matches!(
        e.request_upgrade("u-1", 1, 2).await,
        Err(LadderError::ReconciliationRequired { .. })
    ));
}

#[tokio::test]
async fn test_rollback_reissues_burned_tier() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    let state = e.rollback_upgrade("u-1").await.unwrap();
    assert_eq!(state, TierState::Active { level: 1 });
    assert_eq!(e.user_progress("u-1").badge_status(1), BadgeStatus::Activated);

    let reissue = e
        .ledger()
        .inner
        .entries()
        .into_iter()
        .find(|entry| entry.key.as_str() == "upgrade:u-1:2:1")
        .unwrap();
    assert_eq!((reissue.op, reissue.level), (LedgerOp::Mint, 1));

    assert!(matches!(
        e.rollback_upgrade("u-1").await,
        Err(LadderError::NoPendingUpgrade)
    ));
}

#[tokio::test]
async fn test_upgrade_after_rollback_burns_reissued_tier() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());
    e.rollback_upgrade("u-1").await.unwrap();

    let up = e.request_upgrade("u-1", 1, 2).await.unwrap();
    assert!(!up.resumed);
    assert_eq!(e.ledger().ops(LedgerOp::Burn), 2);
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 2 });
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upgrades_apply_once() {
    let e = Arc::new(TierEngine::in_memory(catalog(), EngineConfig::default()));
    ready_for_tier_two(&*e, "u-1").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let e = Arc::clone(&e);
            tokio::spawn(async move { e.request_upgrade("u-1", 1, 2).await })
        })
        .collect();
    let results = futures_util::future::join_all(handles).await;

    let ok = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(ok, 1);
    for r in &results {
        if let Ok(Err(err)) = r {
            assert!(matches!(err, LadderError::TierNotHeld { .. }));
        }
    }
    let burns = e
        .ledger()
        .entries()
        .iter()
        .filter(|entry| entry.op == LedgerOp::Burn)
        .count();
    assert_eq!(burns, 1);
    assert_eq!(e.user_progress("u-1").tier, TierState::Active { level: 2 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_volume_is_not_lost() {
    let e = Arc::new(TierEngine::in_memory(catalog(), EngineConfig::default()));
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let e = Arc::clone(&e);
            tokio::spawn(async move { e.record_volume("u-1", dec!(1000.005)).await })
        })
        .collect();
    for r in futures_util::future::join_all(handles).await {
        r.unwrap().unwrap();
    }
    // Each delta is truncated to cents before it is added.
    assert_eq!(e.user_progress("u-1").cumulative_volume, dec!(50000));
}

// ---------------------------------------------------------------------------
// Badges + reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_activate_badge_lifecycle() {
    let e = engine();
    assert!(matches!(
        e.activate_badge("u-1", 1).await,
        Err(LadderError::BadgeNotOwned(1))
    ));
    assert!(matches!(
        e.activate_badge("u-1", 77).await,
        Err(LadderError::UnknownBadge(77))
    ));

    assert_eq!(e.award_badge("u-1", 1).await.unwrap(), BadgeStatus::Owned);
    let first = e.activate_badge("u-1", 1).await.unwrap();
    assert!(first.changed);
    let again = e.activate_badge("u-1", 1).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.status, BadgeStatus::Activated);

    // Awarding an activated badge keeps its status.
    assert_eq!(e.award_badge("u-1", 1).await.unwrap(), BadgeStatus::Activated);
}

#[tokio::test]
async fn test_eligibility_and_collection_views() {
    let e = engine();
    let none = e.upgrade_eligibility("u-1");
    assert_eq!(none.target_level, Some(1));
    assert!(!none.eligible);
    assert_eq!(none.volume.unwrap().shortfall, dec!(50000));

    ready_for_tier_two(&e, "u-1").await;
    let elig = e.upgrade_eligibility("u-1");
    assert_eq!(elig.target_level, Some(2));
    assert!(elig.eligible);

    let badges = e.badge_collection("u-1");
    assert_eq!(badges.len(), 3);
    assert_eq!(badges[0].status, BadgeStatus::Activated);
    assert!(badges[0].required_for_upgrade);
    assert_eq!(badges[1].status, BadgeStatus::NotEarned);
    assert!(!badges[1].required_for_upgrade);
}

#[tokio::test]
async fn test_negative_volume_rejected() {
    let e = engine();
    assert!(matches!(
        e.record_volume("u-1", dec!(-1)).await,
        Err(LadderError::InvalidVolume(_))
    ));
    assert!(matches!(
        e.evaluate_progress(dec!(-0.01), &[], &[]),
        Err(LadderError::InvalidVolume(_))
    ));
}

#[tokio::test]
async fn test_fee_savings_follow_held_tier() {
    let e = engine();
    e.record_volume("u-1", dec!(40000)).await.unwrap();
    let before = e.fee_savings("u-1");
    assert_eq!(before.level, None);
    assert_eq!(before.total_saved, Decimal::ZERO);

    e.record_volume("u-1", dec!(85000)).await.unwrap();
    e.claim_tier("u-1", 1).await.unwrap();
    let savings = e.fee_savings("u-1");
    assert_eq!(savings.level, Some(1));
    assert_eq!(savings.tier_name.as_deref(), Some("Tier 1"));
    // 125k at 0.25% -> 0.2375%
    assert_eq!(savings.total_saved, dec!(15.625));

    e.award_special_tier("u-1", "contest-winner").await.unwrap();
    assert_eq!(e.fee_savings("u-1").total_saved, dec!(31.25));
}

#[tokio::test]
async fn test_upgrade_history_tracks_pending_and_completed() {
    let e = engine();
    assert!(e.upgrade_history("u-1").completed.is_empty());

    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    let history = e.upgrade_history("u-1");
    assert_eq!(history.completed.len(), 1);
    assert_eq!(history.completed[0].from, 0);
    assert_eq!(history.pending.as_ref().map(|p| p.to), Some(2));
    assert!(history.can_retry);
    assert_eq!(history.max_retries, 3);

    e.request_upgrade("u-1", 1, 2).await.unwrap();
    let history = e.upgrade_history("u-1");
    assert_eq!(history.completed.len(), 2);
    assert_eq!(history.completed[1].key.as_str(), "upgrade:u-1:1:2");
    assert!(history.completed[1].burn_signature.is_some());
    assert!(history.pending.is_none());
    assert!(!history.can_retry);
}

#[tokio::test]
async fn test_flagged_upgrade_cannot_be_retried() {
    let e = engine();
    ready_for_tier_two(&e, "u-1").await;
    e.ledger().mint_failures.store(1, Ordering::SeqCst);
    assert!(e.request_upgrade("u-1", 1, 2).await.is_err());

    e.flag_stale_pending(Utc::now() + Duration::minutes(11)).await;
    let history = e.upgrade_history("u-1");
    assert!(history.pending.unwrap().needs_reconciliation);
    assert!(!history.can_retry);
}
