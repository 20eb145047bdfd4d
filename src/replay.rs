//! Replaying request scripts against an engine.
//!
//! A script holds one JSON request per line. Lines starting with `#` are
//! comments; a blank line closes a batch. Requests in one batch run
//! concurrently, batches run in order, and responses are written in request
//! order.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use ladder::{spawn_reconciler, TierEngine, TokenLedger};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::output::write_json_line;
use crate::routes::{dispatch, Request};

pub type Batch = Vec<Request>;

/// Parse a request script into batches.
pub fn parse_script(path: &Path, text: &str) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            continue;
        }
        let req = serde_json::from_str(line).map_err(|source| AppError::Script {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        current.push(req);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub batches: usize,
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Run every batch, writing one exchange per line. The reconciliation sweep
/// runs for the duration of the replay.
pub async fn run_replay<L: TokenLedger, W: Write>(
    engine: Arc<TierEngine<L>>,
    batches: Vec<Batch>,
    writer: &mut W,
    cancel: CancellationToken,
) -> Result<ReplaySummary> {
    let sweep_stop = cancel.child_token();
    let sweeper = spawn_reconciler(Arc::clone(&engine), sweep_stop.clone());

    let result = replay_batches(&engine, batches, writer, &cancel).await;

    sweep_stop.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "reconciler task failed");
    }

    let summary = result?;
    info!(
        batches = summary.batches,
        requests = summary.requests,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "replay finished"
    );
    Ok(summary)
}

async fn replay_batches<L: TokenLedger, W: Write>(
    engine: &TierEngine<L>,
    batches: Vec<Batch>,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for batch in batches {
        if cancel.is_cancelled() {
            return Err(AppError::Interrupted);
        }
        summary.batches += 1;
        summary.requests += batch.len();

        let exchanges = join_all(batch.into_iter().map(|req| dispatch(engine, req, cancel))).await;
        for exchange in exchanges {
            let exchange = exchange?;
            if exchange.response["success"] == true {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            write_json_line(writer, &exchange)?;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use ladder::{Catalog, EngineConfig};

    use super::*;

    const SCRIPT: &str = r#"
# seed
{"route":"POST /api/v1/admin/volume","userId":"u-1","volume":"600000"}
{"route":"POST /api/v1/admin/badges/award","userId":"u-1","badgeId":1}

{"route":"POST /api/v1/badges/activate","userId":"u-1","badgeId":1}
{"route":"POST /api/v1/nfts/claim","userId":"u-1"}

{"route":"POST /api/v1/nfts/upgrade","userId":"u-1","fromLevel":1,"toLevel":2}
{"route":"POST /api/v1/nfts/upgrade","userId":"u-1","fromLevel":1,"toLevel":2}
"#;

    #[test]
    fn test_parse_script_batches() {
        let batches = parse_script(Path::new("t.jsonl"), SCRIPT).unwrap();
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 2]);
    }

    #[test]
    fn test_parse_script_reports_line() {
        let err = parse_script(Path::new("t.jsonl"), "\n{\"route\":\"GET /x\"}\n").unwrap_err();
        assert!(matches!(err, AppError::Script { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_upgrade_applies_once() {
        let engine = Arc::new(TierEngine::in_memory(
            Arc::new(Catalog::builtin().unwrap()),
            EngineConfig::default(),
        ));
        let batches = parse_script(Path::new("t.jsonl"), SCRIPT).unwrap();
        let mut out = Vec::new();

        let summary = run_replay(Arc::clone(&engine), batches, &mut out, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.requests, 6);
        assert_eq!(summary.failed, 1);

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[4]["response"]["success"], true);
        assert_eq!(lines[5]["response"]["error"], "TierNotHeld");
        assert_eq!(
            engine.user_progress("u-1").tier,
            ladder::TierState::Active { level: 2 }
        );
    }

    #[tokio::test]
    async fn test_cancelled_replay_stops_before_next_batch() {
        let engine = Arc::new(TierEngine::in_memory(
            Arc::new(Catalog::builtin().unwrap()),
            EngineConfig::default(),
        ));
        let batches = parse_script(Path::new("t.jsonl"), SCRIPT).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut out = Vec::new();
        let err = run_replay(engine, batches, &mut out, cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Interrupted));
        assert!(out.is_empty());
    }
}
