//! Promotion and reward redemption engine.
//!
//! The engine catalogs vouchers and rank rewards, redeems vouchers against
//! their quota at order confirmation, restores quota on cancellation, and
//! prices carts. It can also consume an async stream of order events.

use std::sync::Arc;

use chrono::Utc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::Amount;
use crate::catalog::PromotionCatalog;
use crate::ledger::QuotaLedger;
use crate::model::{
    Command, OrderDiscountBreakdown, Promotion, RedemptionToken, Target, VoucherId, VoucherTemplate,
};
use crate::pricing;
use crate::profile::ProfileStore;
use crate::rank::{Rank, RankProgress, RankTable};
use crate::retry::RetryPolicy;

mod error;
pub use error::{
    ClaimError, EngineError, Ineligibility, PricingError, RedemptionError, ReferralError, RefundError,
};

mod redeem;
pub use redeem::{RedemptionTransaction, check_eligibility};

mod rewards;
pub use rewards::RewardClaimService;

mod refund;
pub use refund::RefundCoordinator;

mod referral;
pub use referral::{ReferralIssuer, ReferralVouchers};

/// Entry point for the order and checkout flows.
///
/// Cheap to clone; clones share the same catalog, ledger and profiles.
#[derive(Debug, Clone)]
pub struct PromoEngine {
    catalog: Arc<PromotionCatalog>,
    ledger: Arc<QuotaLedger>,
    profiles: Arc<ProfileStore>,
    ranks: Arc<RankTable>,
    redemptions: RedemptionTransaction,
    rewards: RewardClaimService,
    refunds: RefundCoordinator,
    referrals: ReferralIssuer,
}

/// Public API
impl PromoEngine {
    pub fn new(ranks: RankTable, retry: RetryPolicy) -> Self {
        let catalog = Arc::new(PromotionCatalog::new());
        let ledger = Arc::new(QuotaLedger::new());
        let profiles = Arc::new(ProfileStore::new());
        let ranks = Arc::new(ranks);

        Self {
            redemptions: RedemptionTransaction::new(Arc::clone(&catalog), Arc::clone(&ledger), retry.clone()),
            rewards: RewardClaimService::new(
                Arc::clone(&catalog),
                Arc::clone(&profiles),
                Arc::clone(&ranks),
                retry.clone(),
            ),
            refunds: RefundCoordinator::new(Arc::clone(&catalog), Arc::clone(&ledger), retry.clone()),
            referrals: ReferralIssuer::new(Arc::clone(&catalog), Arc::clone(&profiles), retry),
            catalog,
            ledger,
            profiles,
            ranks,
        }
    }

    pub fn catalog(&self) -> &PromotionCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Vouchers the user may pick for `target` with the current cart.
    pub fn list_eligible_vouchers(&self, user: &str, cart_subtotal: Amount, target: &Target) -> Vec<Promotion> {
        self.catalog.list_eligible(user, cart_subtotal, target, Utc::now())
    }

    /// Price the cart with the selected vouchers without consuming any quota.
    pub fn preview_price(
        &self,
        subtotal: Amount,
        shipping_fee: Amount,
        product_voucher: Option<&str>,
        shipping_voucher: Option<&str>,
    ) -> Result<OrderDiscountBreakdown, EngineError> {
        let lookup = |id: &str| {
            self.catalog
                .get(id)
                .ok_or_else(|| PricingError::NotFound(id.to_string()))
        };
        let product = product_voucher.map(&lookup).transpose()?;
        let shipping = shipping_voucher.map(&lookup).transpose()?;
        Ok(pricing::compute(subtotal, shipping_fee, product.as_ref(), shipping.as_ref())?)
    }

    /// Consume one slot of a selected voucher once the order is confirmed.
    pub async fn confirm_redemption(
        &self,
        voucher: &str,
        user: &str,
        cart_total: Amount,
        target: &Target,
    ) -> Result<RedemptionToken, EngineError> {
        Ok(self
            .redemptions
            .redeem(voucher, user, cart_total, target, Utc::now())
            .await?)
    }

    /// Give back the slots held by a cancelled order. Must be retried until it succeeds.
    pub async fn cancel_order_refund(
        &self,
        product_voucher: Option<&str>,
        shipping_voucher: Option<&str>,
        user: &str,
    ) -> Result<(), EngineError> {
        Ok(self
            .refunds
            .restore_for_cancelled_order(product_voucher, shipping_voucher, user)
            .await?)
    }

    pub async fn claim_reward(&self, reward: &str, user: &str) -> Result<VoucherId, EngineError> {
        Ok(self.rewards.claim(reward, user, Utc::now()).await?)
    }

    pub fn get_rank(&self, total_spending: Amount) -> &Rank {
        self.ranks.rank_for(total_spending)
    }

    pub fn rank_progress(&self, total_spending: Amount) -> RankProgress {
        self.ranks.progress(total_spending)
    }

    /// Slots `user` can still redeem, `None` when the voucher is unlimited.
    pub fn remaining_quota(&self, voucher: &str, user: &str) -> Result<Option<u32>, EngineError> {
        let promotion = self
            .catalog
            .get(voucher)
            .ok_or_else(|| RedemptionError::NotFound(voucher.to_string()))?;
        Ok(self.ledger.remaining(&promotion, user))
    }

    pub async fn apply_referral(
        &self,
        referee: &str,
        referrer: &str,
        template: &VoucherTemplate,
    ) -> Result<ReferralVouchers, EngineError> {
        Ok(self.referrals.apply(referee, referrer, template, Utc::now()).await?)
    }

    /// Run the engine over a stream of order events, one at a time.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a failed event should not stop the engine, it is already logged
            let _ = self.apply(command).await;
        }
    }

    /// Apply a single order event.
    pub async fn apply(&self, command: Command) -> Result<(), EngineError> {
        let result = match &command {
            Command::RecordSpending { user, total } => {
                self.profiles.set_total_spending(user, *total);
                Ok(())
            }
            Command::Redeem {
                user,
                voucher,
                cart_total,
                target,
            } => self
                .confirm_redemption(voucher, user, *cart_total, target)
                .await
                .map(|_| ()),
            Command::Cancel {
                user,
                product_voucher,
                shipping_voucher,
            } => {
                self.cancel_order_refund(product_voucher.as_deref(), shipping_voucher.as_deref(), user)
                    .await
            }
            Command::Claim { user, reward } => self.claim_reward(reward, user).await.map(|_| ()),
        };
        Self::log_result(&command, &result);
        result
    }
}

/// Private API
impl PromoEngine {
    /// Small helper to log `apply` results; the components log the details
    fn log_result(command: &Command, result: &Result<(), EngineError>) {
        match result {
            Ok(()) => debug!(?command, "event applied"),
            Err(e) if e.is_retryable() => warn!(?command, reason = %e, "event hit contention"),
            Err(e) => debug!(?command, reason = %e, "event skipped"),
        }
    }
}

impl Default for PromoEngine {
    fn default() -> Self {
        Self::new(RankTable::default(), RetryPolicy::default())
    }
}
