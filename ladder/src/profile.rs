//! Profile rules: nickname changes are rate limited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::TierEngine;
use crate::error::{LadderError, Result};
use crate::ledger::TokenLedger;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicknameChange {
    pub nickname: String,
    pub changed_at: DateTime<Utc>,
    pub next_change_at: DateTime<Utc>,
}

impl<L: TokenLedger> TierEngine<L> {
    /// Change a user's nickname; allowed once per cooldown window.
    pub async fn change_nickname(&self, user_id: &str, nickname: &str) -> Result<NicknameChange> {
        self.change_nickname_at(user_id, nickname, Utc::now()).await
    }

    /// [`Self::change_nickname`] with an explicit clock reading.
    pub async fn change_nickname_at(
        &self,
        user_id: &str,
        nickname: &str,
        now: DateTime<Utc>,
    ) -> Result<NicknameChange> {
        let nickname = self.validate_nickname(nickname)?;
        let cooldown = chrono::Duration::seconds(self.config().nickname_cooldown_secs);

        let guard = self.store().lock(user_id).await;
        let mut p = guard.read();
        if p.nickname.as_deref() == Some(nickname.as_str()) {
            return Err(LadderError::InvalidNickname("nickname unchanged".into()));
        }
        if let Some(last) = p.nickname_changed_at {
            let next_allowed_at = last + cooldown;
            if now < next_allowed_at {
                return Err(LadderError::NicknameCooldown { next_allowed_at });
            }
        }

        p.nickname = Some(nickname.clone());
        p.nickname_changed_at = Some(now);
        guard.commit(p);
        info!(user_id, %nickname, "nickname changed");

        Ok(NicknameChange {
            nickname,
            changed_at: now,
            next_change_at: now + cooldown,
        })
    }

    fn validate_nickname(&self, nickname: &str) -> Result<String> {
        let trimmed = nickname.trim();
        if trimmed.is_empty() {
            return Err(LadderError::InvalidNickname("nickname is empty".into()));
        }
        let max = self.config().nickname_max_len;
        if trimmed.chars().count() > max {
            return Err(LadderError::InvalidNickname(format!(
                "nickname longer than {max} characters"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(LadderError::InvalidNickname(
                "nickname contains control characters".into(),
            ));
        }
        Ok(trimmed.to_string())
    }
}
