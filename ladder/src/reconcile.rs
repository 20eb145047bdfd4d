//! Surfacing stuck upgrades for manual reconciliation.
//!
//! A pending upgrade older than `pending_timeout_ms` is flagged and refuses
//! further retries until an operator rolls it back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::TierEngine;
use crate::ledger::TokenLedger;
use crate::types::PendingUpgrade;

impl<L: TokenLedger> TierEngine<L> {
    /// Pending upgrades older than the configured timeout, flagged or not.
    pub fn stale_pending(&self, now: DateTime<Utc>) -> Vec<PendingUpgrade> {
        self.store()
            .user_ids()
            .into_iter()
            .filter_map(|id| self.store().snapshot(&id).tier.pending().cloned())
            .filter(|p| p.needs_reconciliation || self.is_stale(p, now))
            .collect()
    }

    /// Flag stale pending upgrades. Returns the ones flagged by this call.
    pub async fn flag_stale_pending(&self, now: DateTime<Utc>) -> Vec<PendingUpgrade> {
        let mut flagged = Vec::new();
        for user_id in self.store().user_ids() {
            // Cheap pre-check so idle users are never locked.
            let candidate = self
                .store()
                .snapshot(&user_id)
                .tier
                .pending()
                .is_some_and(|p| !p.needs_reconciliation && self.is_stale(p, now));
            if !candidate {
                continue;
            }

            let guard = self.store().lock(&user_id).await;
            let mut p = guard.read();
            let Some(pending) = p.tier.pending().cloned() else {
                continue;
            };
            if pending.needs_reconciliation || !self.is_stale(&pending, now) {
                continue;
            }
            let pending = PendingUpgrade {
                needs_reconciliation: true,
                ..pending
            };
            p.tier = crate::types::TierState::PendingUpgrade(pending.clone());
            guard.commit(p);
            warn!(
                user_id = %user_id,
                key = %pending.key,
                from = pending.from,
                to = pending.to,
                started_at = %pending.started_at,
                attempts = pending.attempts,
                "stale pending upgrade needs reconciliation"
            );
            flagged.push(pending);
        }
        flagged
    }
}

/// Spawn a background task that periodically flags stale pending upgrades.
///
/// # Arguments
///
/// * `engine` - Shared engine to sweep.
/// * `cancel` - Token to stop the sweep loop.
pub fn spawn_reconciler<L: TokenLedger>(
    engine: Arc<TierEngine<L>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // `time::interval` panics on a zero period.
    let interval_ms = engine.config().reconcile_interval_ms.max(1);
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(interval_ms));
        interval.tick().await; // consume immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let flagged = engine.flag_stale_pending(Utc::now()).await;
                    if !flagged.is_empty() {
                        warn!(count = flagged.len(), "pending upgrades awaiting reconciliation");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("reconciler stopped");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::EngineConfig;
    use crate::types::{TierState, UpgradeKey};

    fn stuck_pending(started_at: DateTime<Utc>) -> PendingUpgrade {
        PendingUpgrade {
            key: UpgradeKey::new("u-1", 1, 2),
            from: 1,
            to: 2,
            started_at,
            burn_signature: Some("burn-00000001".into()),
            attempts: 1,
            badges: vec![1],
            needs_reconciliation: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_sweeper_still_flags() {
        let config = EngineConfig {
            reconcile_interval_ms: 0,
            ..Default::default()
        };
        let engine = Arc::new(TierEngine::in_memory(
            Arc::new(Catalog::builtin().unwrap()),
            config,
        ));
        {
            let guard = engine.store().lock("u-1").await;
            let mut p = guard.read();
            p.tier = TierState::PendingUpgrade(stuck_pending(Utc::now() - chrono::Duration::hours(1)));
            guard.commit(p);
        }

        let cancel = CancellationToken::new();
        let handle = spawn_reconciler(Arc::clone(&engine), cancel.clone());
        time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(handle.await.is_ok());
        let pending = engine.user_progress("u-1").tier.pending().cloned().unwrap();
        assert!(pending.needs_reconciliation);
    }
}
