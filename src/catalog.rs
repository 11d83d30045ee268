//! Voucher and reward definitions.
//!
//! The engine only reads vouchers once they are created; quota counters live
//! in the [`QuotaLedger`](crate::ledger::QuotaLedger).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{info, warn};

use crate::Amount;
use crate::model::{Promotion, RankReward, RewardId, Target, UserId, Visibility, VoucherId};
use crate::rank::Rank;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("voucher {0} already exists")]
    DuplicateId(VoucherId),
    #[error("voucher code {0} is already in use")]
    DuplicateCode(String),
    #[error("voucher {voucher} has an invalid discount config: {reason}")]
    InvalidDiscountConfig { voucher: VoucherId, reason: String },
    #[error("voucher {0} would expire past the representable date range")]
    WindowOutOfRange(VoucherId),
    #[error("reward {0} already exists")]
    DuplicateReward(RewardId),
}

#[derive(Debug, Default)]
pub struct PromotionCatalog {
    promotions: DashMap<VoucherId, Promotion>,
    /// Upper-cased code to voucher id.
    codes: DashMap<String, VoucherId>,
    rewards: DashMap<RewardId, RankReward>,
}

impl PromotionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a voucher after checking its invariants. Ids and codes are unique.
    pub fn create(&self, promotion: Promotion) -> Result<(), CatalogError> {
        if let Err(reason) = promotion.validate() {
            warn!(voucher = %promotion.id, %reason, "rejecting invalid voucher");
            return Err(CatalogError::InvalidDiscountConfig {
                voucher: promotion.id,
                reason,
            });
        }

        let code = promotion.code.to_ascii_uppercase();
        let id = promotion.id.clone();

        match self.promotions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CatalogError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(promotion);
            }
        }

        match self.codes.entry(code.clone()) {
            Entry::Occupied(_) => {
                self.promotions.remove(&id);
                Err(CatalogError::DuplicateCode(code))
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
                info!(voucher = %id, %code, "voucher created");
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Promotion> {
        self.promotions.get(id).map(|p| p.value().clone())
    }

    pub fn find_by_code(&self, code: &str) -> Option<Promotion> {
        let id = self
            .codes
            .get(&code.to_ascii_uppercase())
            .map(|id| id.value().clone())?;
        self.get(&id)
    }

    /// Vouchers `user` could apply to `target` for a cart worth `cart_total`.
    ///
    /// Quota is not considered here. Results are ordered by code.
    pub fn list_eligible(
        &self,
        user: &str,
        cart_total: Amount,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Vec<Promotion> {
        let mut eligible: Vec<Promotion> = self
            .promotions
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.is_active
                    && p.is_within_window(now)
                    && p.applies_to.matches(target)
                    && cart_total >= p.min_order_value
                    && p.visibility.admits(user)
            })
            .map(|entry| entry.value().clone())
            .collect();
        eligible.sort_by(|a, b| a.code.cmp(&b.code));
        eligible
    }

    pub fn len(&self) -> usize {
        self.promotions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promotions.is_empty()
    }

    pub fn add_reward(&self, reward: RankReward) -> Result<(), CatalogError> {
        match self.rewards.entry(reward.id.clone()) {
            Entry::Occupied(_) => Err(CatalogError::DuplicateReward(reward.id)),
            Entry::Vacant(slot) => {
                slot.insert(reward);
                Ok(())
            }
        }
    }

    pub fn reward(&self, id: &str) -> Option<RankReward> {
        self.rewards.get(id).map(|r| r.value().clone())
    }

    /// Rewards unlocked at `rank`, ordered by required threshold.
    pub fn rewards_for_rank(&self, rank: &Rank) -> Vec<RankReward> {
        let mut unlocked: Vec<RankReward> = self
            .rewards
            .iter()
            .filter(|entry| entry.value().rank_required.threshold <= rank.threshold)
            .map(|entry| entry.value().clone())
            .collect();
        unlocked.sort_by(|a, b| {
            a.rank_required
                .threshold
                .cmp(&b.rank_required.threshold)
                .then_with(|| a.id.cmp(&b.id))
        });
        unlocked
    }

    /// Private vouchers assigned to `user`.
    pub fn assigned_to(&self, user: &UserId) -> Vec<Promotion> {
        self.promotions
            .iter()
            .filter(|entry| {
                matches!(&entry.value().visibility, Visibility::Private(users) if users.contains(user))
            })
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::{AppliesTo, Discount, VoucherTemplate};
    use chrono::Duration;

    fn catalog() -> PromotionCatalog {
        let catalog = PromotionCatalog::new();
        catalog.create(ship50("u1")).unwrap();
        catalog.create(all20()).unwrap();
        catalog
    }

    #[test]
    fn create_and_get() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("ship50").unwrap().code, "SHIP50");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn find_by_code_ignores_case() {
        let catalog = catalog();
        assert_eq!(catalog.find_by_code("ship50").unwrap().id, "ship50");
        assert!(catalog.find_by_code("nope").is_none());
    }

    #[test]
    fn create_rejects_duplicates() {
        let catalog = catalog();
        assert_eq!(
            catalog.create(all20()),
            Err(CatalogError::DuplicateId("all20".to_string()))
        );

        let same_code = Promotion {
            id: "other".to_string(),
            ..all20()
        };
        assert_eq!(
            catalog.create(same_code),
            Err(CatalogError::DuplicateCode("ALL20".to_string()))
        );
        // the failed insert does not leave a half-created voucher behind
        assert!(catalog.get("other").is_none());
    }

    #[test]
    fn create_rejects_invalid_config() {
        let catalog = PromotionCatalog::new();
        let broken = public("broken", Discount::Percent(150), AppliesTo::All);
        assert!(matches!(
            catalog.create(broken),
            Err(CatalogError::InvalidDiscountConfig { .. })
        ));
        assert!(catalog.is_empty());
    }

    #[test]
    fn list_eligible_filters_by_target() {
        let catalog = catalog();
        let total = Amount::from_minor(150_000);

        let shipping = catalog.list_eligible("u1", total, &Target::Shipping, now());
        let codes: Vec<_> = shipping.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, ["ALL20", "SHIP50"]);

        let order = catalog.list_eligible("u1", total, &Target::Order, now());
        let codes: Vec<_> = order.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, ["ALL20"]);
    }

    #[test]
    fn list_eligible_hides_private_vouchers_from_others() {
        let catalog = catalog();
        let total = Amount::from_minor(150_000);
        let shipping = catalog.list_eligible("u2", total, &Target::Shipping, now());
        assert!(shipping.iter().all(|p| p.id != "ship50"));
    }

    #[test]
    fn list_eligible_enforces_minimum_order() {
        let catalog = catalog();
        let small = catalog.list_eligible("u1", Amount::from_minor(99_999), &Target::Order, now());
        assert!(small.is_empty());
        let exact = catalog.list_eligible("u1", Amount::from_minor(100_000), &Target::Order, now());
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn list_eligible_skips_inactive_and_expired() {
        let catalog = PromotionCatalog::new();
        catalog
            .create(Promotion {
                is_active: false,
                ..public("off", Discount::Percent(5), AppliesTo::All)
            })
            .unwrap();
        catalog
            .create(Promotion {
                valid_until: now(),
                ..public("late", Discount::Percent(5), AppliesTo::All)
            })
            .unwrap();
        catalog
            .create(Promotion {
                valid_from: now() + Duration::hours(1),
                ..public("early", Discount::Percent(5), AppliesTo::All)
            })
            .unwrap();
        assert!(catalog.list_eligible("u1", Amount::ZERO, &Target::Order, now()).is_empty());
    }

    #[test]
    fn rewards_unlock_by_rank() {
        let catalog = PromotionCatalog::new();
        let template = VoucherTemplate {
            code_prefix: "R".to_string(),
            discount: Discount::Percent(10),
            max_discount: Amount::ZERO,
            min_order_value: Amount::ZERO,
            applies_to: AppliesTo::All,
            valid_for: Duration::days(7),
        };
        let silver = Rank::new(Amount::from_minor(500_000), "SILVER");
        let gold = Rank::new(Amount::from_minor(2_000_000), "GOLD");
        for (id, rank) in [("silver-gift", &silver), ("gold-gift", &gold)] {
            catalog
                .add_reward(RankReward {
                    id: id.to_string(),
                    title: id.to_string(),
                    description: String::new(),
                    rank_required: rank.clone(),
                    template: template.clone(),
                })
                .unwrap();
        }

        let at_silver: Vec<_> = catalog.rewards_for_rank(&silver).into_iter().map(|r| r.id).collect();
        assert_eq!(at_silver, ["silver-gift"]);
        let at_gold: Vec<_> = catalog.rewards_for_rank(&gold).into_iter().map(|r| r.id).collect();
        assert_eq!(at_gold, ["silver-gift", "gold-gift"]);

        let again = catalog.reward("gold-gift").unwrap();
        assert_eq!(
            catalog.add_reward(again),
            Err(CatalogError::DuplicateReward("gold-gift".to_string()))
        );
    }

    #[test]
    fn assigned_to_lists_private_vouchers() {
        let catalog = catalog();
        let mine: Vec<_> = catalog.assigned_to(&"u1".to_string()).into_iter().map(|p| p.id).collect();
        assert_eq!(mine, ["ship50"]);
        assert!(catalog.assigned_to(&"u2".to_string()).is_empty());
    }
}
