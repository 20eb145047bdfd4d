//! Route table of the mock API, projected onto engine operations.
//!
//! Each request names its route (`"POST /api/v1/nfts/upgrade"`) and carries
//! the caller's user id plus the route's body fields. Every result is rendered
//! inside the `{ success, data?, message, error? }` envelope.

use chrono::Utc;
use ladder::{ApiResponse, BadgeId, LadderError, TierEngine, TierLevel, TokenLedger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "route")]
pub enum Request {
    #[serde(rename = "GET /api/v1/nfts/info", rename_all = "camelCase")]
    NftInfo { user_id: String },

    #[serde(rename = "POST /api/v1/nfts/claim", rename_all = "camelCase")]
    ClaimNft {
        user_id: String,
        #[serde(default = "first_level")]
        level: TierLevel,
    },

    #[serde(rename = "GET /api/v1/nfts/upgrade-eligibility", rename_all = "camelCase")]
    UpgradeEligibility { user_id: String },

    #[serde(rename = "POST /api/v1/nfts/upgrade", rename_all = "camelCase")]
    UpgradeNft {
        user_id: String,
        from_level: TierLevel,
        to_level: TierLevel,
    },

    #[serde(rename = "GET /api/v1/nfts/upgrade/history", rename_all = "camelCase")]
    UpgradeHistory { user_id: String },

    #[serde(rename = "POST /api/v1/badges/activate", rename_all = "camelCase")]
    ActivateBadge { user_id: String, badge_id: BadgeId },

    #[serde(rename = "GET /api/v1/badges", rename_all = "camelCase")]
    Badges { user_id: String },

    #[serde(rename = "GET /api/v1/fees/structure")]
    FeeStructure,

    #[serde(rename = "GET /api/v1/fees/savings", rename_all = "camelCase")]
    FeeSavings { user_id: String },

    #[serde(rename = "POST /api/v1/users/nickname", rename_all = "camelCase")]
    ChangeNickname { user_id: String, nickname: String },

    #[serde(rename = "POST /api/v1/admin/upgrade/rollback", rename_all = "camelCase")]
    RollbackUpgrade { user_id: String },

    #[serde(rename = "GET /api/v1/admin/upgrade/stale")]
    StaleUpgrades,

    #[serde(rename = "POST /api/v1/admin/volume", rename_all = "camelCase")]
    RecordVolume { user_id: String, volume: Decimal },

    #[serde(rename = "POST /api/v1/admin/badges/award", rename_all = "camelCase")]
    AwardBadge { user_id: String, badge_id: BadgeId },

    #[serde(rename = "POST /api/v1/admin/special/award", rename_all = "camelCase")]
    AwardSpecialTier {
        user_id: String,
        special_tier_id: String,
    },
}

fn first_level() -> TierLevel {
    1
}

impl Request {
    pub fn route(&self) -> &'static str {
        match self {
            Request::NftInfo { .. } => "GET /api/v1/nfts/info",
            Request::ClaimNft { .. } => "POST /api/v1/nfts/claim",
            Request::UpgradeEligibility { .. } => "GET /api/v1/nfts/upgrade-eligibility",
            Request::UpgradeNft { .. } => "POST /api/v1/nfts/upgrade",
            Request::UpgradeHistory { .. } => "GET /api/v1/nfts/upgrade/history",
            Request::ActivateBadge { .. } => "POST /api/v1/badges/activate",
            Request::Badges { .. } => "GET /api/v1/badges",
            Request::FeeStructure => "GET /api/v1/fees/structure",
            Request::FeeSavings { .. } => "GET /api/v1/fees/savings",
            Request::ChangeNickname { .. } => "POST /api/v1/users/nickname",
            Request::RollbackUpgrade { .. } => "POST /api/v1/admin/upgrade/rollback",
            Request::StaleUpgrades => "GET /api/v1/admin/upgrade/stale",
            Request::RecordVolume { .. } => "POST /api/v1/admin/volume",
            Request::AwardBadge { .. } => "POST /api/v1/admin/badges/award",
            Request::AwardSpecialTier { .. } => "POST /api/v1/admin/special/award",
        }
    }
}

/// One request and its rendered envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub route: &'static str,
    pub response: Value,
}

/// Run a request against the engine and render the envelope.
pub async fn dispatch<L: TokenLedger>(
    engine: &TierEngine<L>,
    req: Request,
    cancel: &CancellationToken,
) -> Result<Exchange> {
    let route = req.route();
    debug!(route, "dispatch");

    let response = match req {
        Request::NftInfo { user_id } => respond(
            engine.overview(&user_id),
            "User NFT status retrieved successfully",
        ),
        Request::ClaimNft { user_id, level } => respond(
            engine.claim_tier_cancellable(&user_id, level, cancel).await,
            "NFT claimed successfully",
        ),
        Request::UpgradeEligibility { user_id } => respond(
            Ok(engine.upgrade_eligibility(&user_id)),
            "Qualification status retrieved successfully",
        ),
        Request::UpgradeNft {
            user_id,
            from_level,
            to_level,
        } => {
            let result = engine
                .request_upgrade_cancellable(&user_id, from_level, to_level, cancel)
                .await;
            let message = match &result {
                Ok(up) if up.resumed => "Upgrade resumed and completed successfully",
                _ => "Upgrade completed successfully! Your new NFT is ready.",
            };
            respond(result, message)
        }
        Request::UpgradeHistory { user_id } => respond(
            Ok(engine.upgrade_history(&user_id)),
            "Upgrade history retrieved successfully",
        ),
        Request::ActivateBadge { user_id, badge_id } => respond(
            engine.activate_badge(&user_id, badge_id).await,
            "Badge activated successfully",
        ),
        Request::Badges { user_id } => respond(
            Ok(engine.badge_collection(&user_id)),
            "Badges retrieved successfully",
        ),
        Request::FeeStructure => respond(
            Ok(engine.catalog().fee_structure()),
            "Fee structure retrieved successfully",
        ),
        Request::FeeSavings { user_id } => respond(
            Ok(engine.fee_savings(&user_id)),
            "User fee savings retrieved successfully",
        ),
        Request::ChangeNickname { user_id, nickname } => respond(
            engine.change_nickname(&user_id, &nickname).await,
            "Nickname updated successfully",
        ),
        Request::RollbackUpgrade { user_id } => respond(
            engine.rollback_upgrade(&user_id).await,
            "Pending upgrade rolled back",
        ),
        Request::StaleUpgrades => respond(
            Ok(engine.stale_pending(Utc::now())),
            "Stale upgrades retrieved successfully",
        ),
        Request::RecordVolume { user_id, volume } => respond(
            engine.record_volume(&user_id, volume).await,
            "Trading volume recorded successfully",
        ),
        Request::AwardBadge { user_id, badge_id } => respond(
            engine.award_badge(&user_id, badge_id).await,
            "Badge awarded successfully",
        ),
        Request::AwardSpecialTier {
            user_id,
            special_tier_id,
        } => respond(
            engine.award_special_tier(&user_id, &special_tier_id).await,
            "Special tier awarded successfully",
        ),
    }?;

    Ok(Exchange { route, response })
}

fn respond<T: Serialize>(result: ladder::Result<T>, message: &str) -> Result<Value> {
    if let Err(e) = &result {
        log_failure(e);
    }
    Ok(serde_json::to_value(ApiResponse::from_result(result, message))?)
}

fn log_failure(e: &LadderError) {
    if e.is_retryable() {
        tracing::warn!(kind = e.kind(), error = %e, "request failed, retry allowed");
    } else {
        debug!(kind = e.kind(), error = %e, "request rejected");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ladder::{Catalog, EngineConfig};
    use serde_json::json;

    use super::*;

    fn engine() -> TierEngine {
        TierEngine::in_memory(Arc::new(Catalog::builtin().unwrap()), EngineConfig::default())
    }

    fn parse(value: Value) -> Request {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_parses_route_tag() {
        let req = parse(json!({
            "route": "POST /api/v1/nfts/upgrade",
            "userId": "u-1",
            "fromLevel": 1,
            "toLevel": 2
        }));
        assert!(matches!(
            req,
            Request::UpgradeNft { from_level: 1, to_level: 2, .. }
        ));

        let claim = parse(json!({ "route": "POST /api/v1/nfts/claim", "userId": "u-1" }));
        assert!(matches!(claim, Request::ClaimNft { level: 1, .. }));

        let award = parse(json!({
            "route": "POST /api/v1/admin/badges/award",
            "userId": "u-1",
            "badgeId": 5
        }));
        assert!(matches!(award, Request::AwardBadge { badge_id: 5, .. }));

        let too_high = serde_json::from_value::<Request>(json!({
            "route": "POST /api/v1/nfts/claim",
            "userId": "u-1",
            "level": 300
        }));
        assert!(too_high.is_err());

        let unknown = serde_json::from_value::<Request>(json!({ "route": "GET /nope" }));
        assert!(unknown.is_err());
    }

    #[tokio::test]
    async fn test_claim_flow_through_routes() {
        let e = engine();
        let cancel = CancellationToken::new();

        let denied = dispatch(
            &e,
            parse(json!({ "route": "POST /api/v1/nfts/claim", "userId": "u-1" })),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(denied.response["success"], false);
        assert_eq!(denied.response["error"], "InsufficientVolume");

        dispatch(
            &e,
            parse(json!({ "route": "POST /api/v1/admin/volume", "userId": "u-1", "volume": "150000" })),
            &cancel,
        )
        .await
        .unwrap();
        let claimed = dispatch(
            &e,
            parse(json!({ "route": "POST /api/v1/nfts/claim", "userId": "u-1" })),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(claimed.response["success"], true);
        assert_eq!(claimed.response["message"], "NFT claimed successfully");
        assert_eq!(claimed.response["data"]["level"], 1);

        let info = dispatch(
            &e,
            parse(json!({ "route": "GET /api/v1/nfts/info", "userId": "u-1" })),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(info.route, "GET /api/v1/nfts/info");
        assert_eq!(info.response["data"]["tier"]["state"], "active");
        assert_eq!(info.response["data"]["feeSchedule"]["tierDiscountPct"], "5");
    }

    #[tokio::test]
    async fn test_fee_structure_route() {
        let e = engine();
        let out = dispatch(&e, Request::FeeStructure, &CancellationToken::new())
            .await
            .unwrap();
        let rows = out.response["data"].as_array().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4]["discountPct"], "25");
    }

    #[tokio::test]
    async fn test_savings_and_history_routes() {
        let e = engine();
        let cancel = CancellationToken::new();
        e.record_volume("u-1", rust_decimal_macros::dec!(150000)).await.unwrap();
        e.claim_tier("u-1", 1).await.unwrap();

        let savings = dispatch(
            &e,
            parse(json!({ "route": "GET /api/v1/fees/savings", "userId": "u-1" })),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(savings.response["message"], "User fee savings retrieved successfully");
        assert_eq!(savings.response["data"]["level"], 1);
        // 150k at 0.25% -> 0.2375%
        assert_eq!(savings.response["data"]["totalSaved"], "18.75");

        let history = dispatch(
            &e,
            parse(json!({ "route": "GET /api/v1/nfts/upgrade/history", "userId": "u-1" })),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(history.route, "GET /api/v1/nfts/upgrade/history");
        let data = &history.response["data"];
        assert_eq!(data["completed"][0]["from"], 0);
        assert_eq!(data["completed"][0]["to"], 1);
        assert!(data["pending"].is_null());
        assert_eq!(data["canRetry"], false);
    }
}
