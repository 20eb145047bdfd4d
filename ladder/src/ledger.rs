//! Token ledger seam: burning and minting tier tokens.
//!
//! The real ledger lives on chain; the engine only needs two operations and
//! treats both as slow, fallible and possibly hanging. Implementations must be
//! idempotent per `(key, operation)` so a resumed upgrade never issues twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::types::{TierLevel, UpgradeKey};

/// External mint/burn backend.
pub trait TokenLedger: Send + Sync + 'static {
    /// Revoke the token of `level` held by `user_id`. Returns a signature.
    fn burn(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Issue a token of `level` to `user_id`. Returns a signature.
    fn mint(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Forget the operations recorded under `key`, so the same key can be used
    /// again after a rollback.
    fn release(&self, _key: &UpgradeKey) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerOp {
    Burn,
    Mint,
}

/// One recorded ledger operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub op: LedgerOp,
    pub user_id: String,
    pub level: TierLevel,
    pub key: UpgradeKey,
    pub signature: String,
}

/// Ledger kept in process memory, for local runs and tests.
///
/// Operations are recorded when their future is first polled; a call dropped
/// before that (timeout, cancellation) leaves no entry.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    by_key: Mutex<HashMap<(UpgradeKey, LedgerOp), String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations recorded so far, in order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn forget(&self, key: &UpgradeKey) {
        let mut by_key = self.by_key.lock().unwrap_or_else(PoisonError::into_inner);
        by_key.remove(&(key.clone(), LedgerOp::Burn));
        by_key.remove(&(key.clone(), LedgerOp::Mint));
        debug!(%key, "ledger key released");
    }

    fn record(&self, op: LedgerOp, user_id: &str, level: TierLevel, key: &UpgradeKey) -> String {
        let mut by_key = self.by_key.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sig) = by_key.get(&(key.clone(), op)) {
            debug!(%key, ?op, "ledger replay");
            return sig.clone();
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let signature = format!(
            "{}-{:08x}",
            match op {
                LedgerOp::Burn => "burn",
                LedgerOp::Mint => "mint",
            },
            entries.len() + 1
        );
        entries.push(LedgerEntry {
            op,
            user_id: user_id.to_string(),
            level,
            key: key.clone(),
            signature: signature.clone(),
        });
        by_key.insert((key.clone(), op), signature.clone());
        signature
    }
}

impl TokenLedger for InMemoryLedger {
    fn burn(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send {
        async move { Ok(self.record(LedgerOp::Burn, user_id, level, key)) }
    }

    fn mint(
        &self,
        user_id: &str,
        level: TierLevel,
        key: &UpgradeKey,
    ) -> impl Future<Output = Result<String>> + Send {
        async move { Ok(self.record(LedgerOp::Mint, user_id, level, key)) }
    }

    fn release(&self, key: &UpgradeKey) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.forget(key);
            Ok(())
        }
    }
}
