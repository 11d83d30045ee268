use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use super::error::ClaimError;
use crate::catalog::PromotionCatalog;
use crate::model::VoucherId;
use crate::profile::{ProfileError, ProfileStore};
use crate::rank::RankTable;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Gates one-time rank rewards and mints their private vouchers.
#[derive(Debug, Clone)]
pub struct RewardClaimService {
    catalog: Arc<PromotionCatalog>,
    profiles: Arc<ProfileStore>,
    ranks: Arc<RankTable>,
    retry: RetryPolicy,
}

impl RewardClaimService {
    pub fn new(
        catalog: Arc<PromotionCatalog>,
        profiles: Arc<ProfileStore>,
        ranks: Arc<RankTable>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            profiles,
            ranks,
            retry,
        }
    }

    /// Claim `reward_id` for `user` and return the id of the minted voucher.
    ///
    /// The claimed flag is written before the voucher is minted, so a failure
    /// in between leaves a claimed reward without a voucher and never the
    /// reverse. Re-running the claim then stops at `AlreadyClaimed`.
    pub async fn claim(
        &self,
        reward_id: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<VoucherId, ClaimError> {
        let result = self.try_claim(reward_id, user, now).await;
        match &result {
            Ok(voucher) => info!(reward = reward_id, user, %voucher, "reward claimed"),
            Err(e) => info!(reward = reward_id, user, reason = %e, "reward claim skipped"),
        }
        result
    }

    async fn try_claim(
        &self,
        reward_id: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<VoucherId, ClaimError> {
        let reward = self
            .catalog
            .reward(reward_id)
            .ok_or_else(|| ClaimError::RewardNotFound(reward_id.to_string()))?;

        // each attempt re-reads the profile: a concurrent claim may have won
        retry_on_conflict(
            &self.retry,
            "claim",
            |e| matches!(e, ClaimError::ConcurrencyConflict(..)),
            || {
                let profile = self
                    .profiles
                    .get(user)
                    .ok_or_else(|| ClaimError::UserNotFound(user.to_string()))?;

                if profile.has_claimed(reward_id) {
                    return Err(ClaimError::AlreadyClaimed(reward_id.to_string(), user.to_string()));
                }

                let current = self.ranks.rank_for(profile.total_spending);
                if current.threshold < reward.rank_required.threshold {
                    return Err(ClaimError::RankInsufficient {
                        reward: reward_id.to_string(),
                        required: reward.rank_required.name.clone(),
                        current: current.name.clone(),
                    });
                }

                self.profiles
                    .add_claimed_reward(user, reward_id, profile.version)
                    .map_err(|e| match e {
                        ProfileError::NotFound(u) => ClaimError::UserNotFound(u),
                        ProfileError::VersionConflict(u) => {
                            ClaimError::ConcurrencyConflict(u, self.retry.attempts())
                        }
                    })
            },
        )
        .await?;

        let id = Uuid::new_v4();
        let voucher_id = id.to_string();
        let suffix: String = id.simple().to_string().chars().take(8).collect();
        reward
            .template
            .mint(voucher_id.clone(), &suffix, user, now)
            .and_then(|voucher| self.catalog.create(voucher))
            .map_err(|e| {
                error!(reward = reward_id, user, error = %e, "reward claimed without a voucher");
                ClaimError::MintFailed(reward_id.to_string(), e)
            })?;

        Ok(voucher_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::catalog::CatalogError;
    use crate::model::fixtures::now;
    use crate::model::{AppliesTo, Discount, Quota, RankReward, Visibility, VoucherTemplate};
    use chrono::Duration;

    fn silver_reward(ranks: &RankTable) -> RankReward {
        RankReward {
            id: "silver-gift".to_string(),
            title: "Silver gift".to_string(),
            description: "10% off your next order".to_string(),
            rank_required: ranks.by_name("SILVER").unwrap().clone(),
            template: VoucherTemplate {
                code_prefix: "SILVER".to_string(),
                discount: Discount::Percent(10),
                max_discount: Amount::from_minor(30_000),
                min_order_value: Amount::ZERO,
                applies_to: AppliesTo::All,
                valid_for: Duration::days(30),
            },
        }
    }

    fn setup() -> (RewardClaimService, Arc<PromotionCatalog>, Arc<ProfileStore>) {
        let ranks = Arc::new(RankTable::default());
        let catalog = Arc::new(PromotionCatalog::new());
        catalog.add_reward(silver_reward(&ranks)).unwrap();
        let profiles = Arc::new(ProfileStore::new());
        let service = RewardClaimService::new(
            Arc::clone(&catalog),
            Arc::clone(&profiles),
            ranks,
            RetryPolicy::default(),
        );
        (service, catalog, profiles)
    }

    #[tokio::test]
    async fn claim_requires_rank() {
        let (service, catalog, profiles) = setup();
        profiles.register("u1");

        let result = service.claim("silver-gift", "u1", now()).await;
        assert_eq!(
            result,
            Err(ClaimError::RankInsufficient {
                reward: "silver-gift".to_string(),
                required: "SILVER".to_string(),
                current: "BRONZE".to_string(),
            })
        );
        assert!(catalog.is_empty());
        assert!(!profiles.get("u1").unwrap().has_claimed("silver-gift"));
    }

    #[tokio::test]
    async fn claim_mints_private_voucher() {
        let (service, catalog, profiles) = setup();
        profiles.set_total_spending("u1", Amount::from_minor(600_000));

        let voucher_id = service.claim("silver-gift", "u1", now()).await.unwrap();
        let voucher = catalog.get(&voucher_id).unwrap();
        assert_eq!(voucher.visibility, Visibility::only("u1"));
        assert_eq!(voucher.quota_for("u1"), Quota::PerUser(1));
        assert_eq!(voucher.valid_from, now());
        assert!(voucher.code.starts_with("SILVER-"));
        assert!(profiles.get("u1").unwrap().has_claimed("silver-gift"));
    }

    #[tokio::test]
    async fn second_claim_is_rejected() {
        let (service, catalog, profiles) = setup();
        profiles.set_total_spending("u1", Amount::from_minor(600_000));

        service.claim("silver-gift", "u1", now()).await.unwrap();
        let again = service.claim("silver-gift", "u1", now()).await;
        assert_eq!(
            again,
            Err(ClaimError::AlreadyClaimed("silver-gift".to_string(), "u1".to_string()))
        );
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn unknown_reward_and_user() {
        let (service, _, profiles) = setup();
        profiles.register("u1");
        assert_eq!(
            service.claim("nope", "u1", now()).await,
            Err(ClaimError::RewardNotFound("nope".to_string()))
        );
        assert_eq!(
            service.claim("silver-gift", "ghost", now()).await,
            Err(ClaimError::UserNotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn unmintable_template_reports_mint_failure() {
        let (service, catalog, profiles) = setup();
        let ranks = RankTable::default();
        catalog
            .add_reward(RankReward {
                id: "eternal".to_string(),
                template: VoucherTemplate {
                    valid_for: Duration::days(100_000_000),
                    ..silver_reward(&ranks).template
                },
                ..silver_reward(&ranks)
            })
            .unwrap();
        profiles.set_total_spending("u1", Amount::from_minor(600_000));

        let result = service.claim("eternal", "u1", now()).await;
        assert!(matches!(
            result,
            Err(ClaimError::MintFailed(ref reward, CatalogError::WindowOutOfRange(_))) if reward == "eternal"
        ));
        // the flag stays set so a reconciliation can find the missing voucher
        assert!(profiles.get("u1").unwrap().has_claimed("eternal"));
        assert_eq!(catalog.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_mint_once() {
        let (service, catalog, profiles) = setup();
        profiles.set_total_spending("u1", Amount::from_minor(600_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.claim("silver-gift", "u1", now()).await })
            })
            .collect();

        let mut minted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => minted += 1,
                Err(ClaimError::AlreadyClaimed(..)) => {}
                Err(other) => panic!("unexpected {other}"),
            }
        }
        assert_eq!(minted, 1);
        assert_eq!(catalog.len(), 1);
    }
}
