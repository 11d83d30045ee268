use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::error::{Ineligibility, RedemptionError};
use crate::Amount;
use crate::catalog::PromotionCatalog;
use crate::ledger::{LedgerError, QuotaLedger};
use crate::model::{Promotion, RedemptionToken, Target};
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Consumes voucher slots at order confirmation.
///
/// Never mutates the catalog; the only write is the ledger's guarded consume.
#[derive(Debug, Clone)]
pub struct RedemptionTransaction {
    catalog: Arc<PromotionCatalog>,
    ledger: Arc<QuotaLedger>,
    retry: RetryPolicy,
}

impl RedemptionTransaction {
    pub fn new(catalog: Arc<PromotionCatalog>, ledger: Arc<QuotaLedger>, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            ledger,
            retry,
        }
    }

    /// Redeem one slot of `voucher_id` for `user`:
    /// - Load the voucher
    /// - Reject it outside its validity window
    /// - Reject it if inactive, misconfigured, aimed at another target, hidden
    ///   from the user, or above the cart total
    /// - Consume a slot, retrying lost races with jittered backoff
    pub async fn redeem(
        &self,
        voucher_id: &str,
        user: &str,
        cart_total: Amount,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<RedemptionToken, RedemptionError> {
        let result = self.try_redeem(voucher_id, user, cart_total, target, now).await;
        match &result {
            Ok(_) => info!(voucher = voucher_id, user, cart_total = %cart_total, "redemption applied"),
            Err(e) => info!(voucher = voucher_id, user, cart_total = %cart_total, reason = %e, "redemption skipped"),
        }
        result
    }

    async fn try_redeem(
        &self,
        voucher_id: &str,
        user: &str,
        cart_total: Amount,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<RedemptionToken, RedemptionError> {
        let promotion = self
            .catalog
            .get(voucher_id)
            .ok_or_else(|| RedemptionError::NotFound(voucher_id.to_string()))?;

        check_eligibility(&promotion, user, cart_total, target, now)?;

        let ledger = &self.ledger;
        retry_on_conflict(
            &self.retry,
            "redeem",
            |e| matches!(e, LedgerError::ConcurrencyConflict { .. }),
            || ledger.try_consume(&promotion, user),
        )
        .await
        .map_err(|e| match e {
            LedgerError::QuotaExhausted { .. } => {
                RedemptionError::QuotaExhausted(voucher_id.to_string(), user.to_string())
            }
            LedgerError::ConcurrencyConflict { .. } => {
                RedemptionError::ConcurrencyConflict(voucher_id.to_string(), self.retry.attempts())
            }
        })?;

        Ok(RedemptionToken {
            voucher_id: voucher_id.to_string(),
            user_id: user.to_string(),
            consumed_at: now,
        })
    }
}

/// Static checks a voucher must pass before any slot is consumed.
pub fn check_eligibility(
    promotion: &Promotion,
    user: &str,
    cart_total: Amount,
    target: &Target,
    now: DateTime<Utc>,
) -> Result<(), RedemptionError> {
    let not_eligible = |why| RedemptionError::NotEligible(promotion.id.clone(), why);

    if !promotion.is_within_window(now) {
        return Err(RedemptionError::Expired(promotion.id.clone()));
    }
    if let Err(reason) = promotion.validate() {
        warn!(voucher = %promotion.id, %reason, "voucher violates its own constraints");
        return Err(not_eligible(Ineligibility::InvalidConfig(reason)));
    }
    if !promotion.is_active {
        return Err(not_eligible(Ineligibility::Inactive));
    }
    if !promotion.applies_to.matches(target) {
        return Err(not_eligible(Ineligibility::TargetMismatch));
    }
    if !promotion.visibility.admits(user) {
        return Err(not_eligible(Ineligibility::NotAssigned));
    }
    if cart_total < promotion.min_order_value {
        return Err(not_eligible(Ineligibility::BelowMinimum {
            required: promotion.min_order_value,
            actual: cart_total,
        }));
    }
    Ok(())
}
