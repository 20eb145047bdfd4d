//! Immutable tier, badge and special tier catalog.
//!
//! The catalog is validated once when it is built. Every lookup afterwards can
//! rely on contiguous levels `1..=max_level`, strictly increasing volume
//! requirements and badge references that resolve.

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LadderError, Result};
use crate::types::{Badge, BadgeId, FeeSchedule, FeeTierRow, SpecialTier, Tier, TierLevel};

const DEFAULT_CATALOG: &str = include_str!("../catalog/default.json");

/// Reference data shared read-only by every request.
///
/// Only [`Catalog::new`] builds one, so every instance has been validated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    base_fee_rate: Decimal,
    tiers: Vec<Tier>,
    special_tiers: Vec<SpecialTier>,
    badges: Vec<Badge>,
}

/// Catalog file layout, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalog {
    base_fee_rate: Decimal,
    tiers: Vec<Tier>,
    #[serde(default)]
    special_tiers: Vec<SpecialTier>,
    #[serde(default)]
    badges: Vec<Badge>,
}

impl Catalog {
    /// Build and validate a catalog. Tiers may be given in any order.
    pub fn new(
        base_fee_rate: Decimal,
        mut tiers: Vec<Tier>,
        special_tiers: Vec<SpecialTier>,
        mut badges: Vec<Badge>,
    ) -> Result<Self> {
        tiers.sort_by_key(|t| t.level);
        badges.sort_by_key(|b| b.id);
        let catalog = Self {
            base_fee_rate,
            tiers,
            special_tiers,
            badges,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in catalog.
    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_CATALOG)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawCatalog = serde_json::from_str(json)?;
        Self::new(raw.base_fee_rate, raw.tiers, raw.special_tiers, raw.badges)
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            tiers = catalog.tiers.len(),
            badges = catalog.badges.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(LadderError::Catalog("no tiers defined".into()));
        }
        if self.base_fee_rate < Decimal::ZERO || self.base_fee_rate >= Decimal::ONE {
            return Err(LadderError::Catalog(format!(
                "base fee rate {} outside [0, 1)",
                self.base_fee_rate
            )));
        }

        let mut badge_ids = HashSet::new();
        for badge in &self.badges {
            if !badge_ids.insert(badge.id) {
                return Err(LadderError::Catalog(format!("duplicate badge id {}", badge.id)));
            }
        }

        let max_level = self.tiers.len();
        let mut previous: Option<&Tier> = None;
        for (i, tier) in self.tiers.iter().enumerate() {
            if usize::from(tier.level) != i + 1 {
                return Err(LadderError::Catalog(format!(
                    "tier levels must be contiguous from 1, found {} at position {}",
                    tier.level,
                    i + 1
                )));
            }
            if tier.name.trim().is_empty() {
                return Err(LadderError::Catalog(format!("tier {} has no name", tier.level)));
            }
            if tier.required_volume < Decimal::ZERO {
                return Err(LadderError::Catalog(format!(
                    "tier {} has negative required volume",
                    tier.level
                )));
            }
            if let Some(prev) = previous {
                if tier.required_volume <= prev.required_volume {
                    return Err(LadderError::Catalog(format!(
                        "required volume of tier {} ({}) must exceed tier {} ({})",
                        tier.level, tier.required_volume, prev.level, prev.required_volume
                    )));
                }
            }
            check_discount(&format!("tier {}", tier.level), tier.fee_discount_pct)?;
            for id in &tier.required_badges {
                if !badge_ids.contains(id) {
                    return Err(LadderError::Catalog(format!(
                        "tier {} requires unknown badge {id}",
                        tier.level
                    )));
                }
            }
            previous = Some(tier);
        }

        for badge in &self.badges {
            if badge.tier_level == 0 || usize::from(badge.tier_level) > max_level {
                return Err(LadderError::Catalog(format!(
                    "badge {} belongs to unknown tier {}",
                    badge.id, badge.tier_level
                )));
            }
        }

        let mut special_ids = HashSet::new();
        for special in &self.special_tiers {
            if !special_ids.insert(special.id.as_str()) {
                return Err(LadderError::Catalog(format!(
                    "duplicate special tier {}",
                    special.id
                )));
            }
            check_discount(&format!("special tier {}", special.id), special.fee_discount_pct)?;
        }

        Ok(())
    }

    pub fn base_fee_rate(&self) -> Decimal {
        self.base_fee_rate
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn special_tiers(&self) -> &[SpecialTier] {
        &self.special_tiers
    }

    pub fn max_level(&self) -> TierLevel {
        // Validation bounds the count by the u8 level field.
        self.tiers.last().map(|t| t.level).unwrap_or(0)
    }

    pub fn tier(&self, level: TierLevel) -> Option<&Tier> {
        if level == 0 {
            return None;
        }
        self.tiers.get(usize::from(level) - 1)
    }

    pub fn badge(&self, id: BadgeId) -> Result<&Badge> {
        self.badges
            .binary_search_by_key(&id, |b| b.id)
            .map(|i| &self.badges[i])
            .map_err(|_| LadderError::UnknownBadge(id))
    }

    pub fn special_tier(&self, id: &str) -> Result<&SpecialTier> {
        self.special_tiers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| LadderError::UnknownSpecialTier(id.to_string()))
    }

    /// Prerequisite badges of every level in `(from, to]`, in level order.
    pub fn required_badges_between(&self, from: TierLevel, to: TierLevel) -> Vec<BadgeId> {
        self.tiers
            .iter()
            .filter(|t| t.level > from && t.level <= to)
            .flat_map(|t| t.required_badges.iter().copied())
            .collect()
    }

    /// Fee schedule for a ladder level plus a set of special tier ids.
    ///
    /// Unknown special ids contribute nothing.
    pub fn fee_schedule<'a>(
        &self,
        level: TierLevel,
        special_ids: impl IntoIterator<Item = &'a String>,
    ) -> FeeSchedule {
        let tier_pct = self
            .tier(level)
            .map(|t| t.fee_discount_pct)
            .unwrap_or(Decimal::ZERO);
        let special_pct = special_ids
            .into_iter()
            .filter_map(|id| self.special_tier(id).ok())
            .map(|s| s.fee_discount_pct)
            .sum();
        FeeSchedule::new(self.base_fee_rate, tier_pct, special_pct)
    }

    /// Benefits of a ladder level plus a set of special tier ids.
    pub fn benefits<'a>(
        &self,
        level: TierLevel,
        special_ids: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        let mut benefits: Vec<String> = self
            .tier(level)
            .map(|t| t.benefits.clone())
            .unwrap_or_default();
        for special in special_ids
            .into_iter()
            .filter_map(|id| self.special_tier(id).ok())
        {
            benefits.extend(special.benefits.iter().cloned());
        }
        benefits
    }

    /// Published fee table, one row per ladder level.
    pub fn fee_structure(&self) -> Vec<FeeTierRow> {
        self.tiers
            .iter()
            .map(|t| {
                let fee = FeeSchedule::new(self.base_fee_rate, t.fee_discount_pct, Decimal::ZERO);
                FeeTierRow {
                    level: t.level,
                    name: t.name.clone(),
                    discount_pct: t.fee_discount_pct,
                    effective_fee_rate: fee.effective_fee_rate,
                    benefits: t.benefits.clone(),
                }
            })
            .collect()
    }
}

fn check_discount(what: &str, pct: Decimal) -> Result<()> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(LadderError::Catalog(format!(
            "{what} discount {pct} outside [0, 100]"
        )));
    }
    Ok(())
}
