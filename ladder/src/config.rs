//! Engine configuration.

/// Tuneable parameters for the tier engine.
///
/// Use [`Default::default()`] for the production defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for a single ledger call (burn or mint) in milliseconds.
    pub ledger_timeout_ms: u64,
    /// Number of resume attempts allowed for one pending upgrade.
    pub max_upgrade_retries: u32,
    /// Age after which a pending upgrade is handed to manual reconciliation.
    pub pending_timeout_ms: u64,
    /// Minimum interval between nickname changes in seconds.
    pub nickname_cooldown_secs: i64,
    /// Maximum nickname length in characters.
    pub nickname_max_len: usize,
    /// Interval of the reconciliation sweeper in milliseconds.
    pub reconcile_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_timeout_ms: 30_000,
            max_upgrade_retries: 3,
            pending_timeout_ms: 10 * 60 * 1000, // 10 minutes
            nickname_cooldown_secs: 7 * 24 * 60 * 60, // 7 days
            nickname_max_len: 32,
            reconcile_interval_ms: 60_000,
        }
    }
}
