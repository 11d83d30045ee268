use std::sync::Arc;

use tracing::{info, warn};

use super::error::RefundError;
use crate::catalog::PromotionCatalog;
use crate::ledger::{LedgerError, QuotaLedger};
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Gives quota back when an order holding vouchers is cancelled.
///
/// Restores floor at zero, so a repeated call cannot push a counter negative.
/// The order side still owns the "refund issued" flag and must call this once
/// per cancellation; any error here must be retried by that caller.
#[derive(Debug, Clone)]
pub struct RefundCoordinator {
    catalog: Arc<PromotionCatalog>,
    ledger: Arc<QuotaLedger>,
    retry: RetryPolicy,
}

impl RefundCoordinator {
    pub fn new(catalog: Arc<PromotionCatalog>, ledger: Arc<QuotaLedger>, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            ledger,
            retry,
        }
    }

    pub async fn restore_for_cancelled_order(
        &self,
        product_voucher: Option<&str>,
        shipping_voucher: Option<&str>,
        user: &str,
    ) -> Result<(), RefundError> {
        for voucher in [product_voucher, shipping_voucher].into_iter().flatten() {
            if let Err(e) = self.restore(voucher, user).await {
                warn!(voucher, user, error = %e, "quota restore failed");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn restore(&self, voucher_id: &str, user: &str) -> Result<(), RefundError> {
        let promotion = self
            .catalog
            .get(voucher_id)
            .ok_or_else(|| RefundError::NotFound(voucher_id.to_string()))?;

        let ledger = &self.ledger;
        let entry = retry_on_conflict(
            &self.retry,
            "restore",
            |e| matches!(e, LedgerError::ConcurrencyConflict { .. }),
            || ledger.try_restore(&promotion, user),
        )
        .await
        .map_err(|_| RefundError::ConcurrencyConflict(voucher_id.to_string(), self.retry.attempts()))?;

        info!(voucher = voucher_id, user, consumed = entry.consumed, "quota restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SlotKey;
    use crate::model::fixtures::*;

    fn setup() -> (RefundCoordinator, Arc<PromotionCatalog>, Arc<QuotaLedger>) {
        let catalog = Arc::new(PromotionCatalog::new());
        catalog.create(ship50("u1")).unwrap();
        catalog.create(all20()).unwrap();
        let ledger = Arc::new(QuotaLedger::new());
        let refunds = RefundCoordinator::new(Arc::clone(&catalog), Arc::clone(&ledger), RetryPolicy::default());
        (refunds, catalog, ledger)
    }

    #[tokio::test]
    async fn restores_both_vouchers() {
        let (refunds, catalog, ledger) = setup();
        let ship = catalog.get("ship50").unwrap();
        let all = catalog.get("all20").unwrap();
        ledger.try_consume(&ship, "u1").unwrap();
        ledger.try_consume(&all, "u1").unwrap();

        refunds
            .restore_for_cancelled_order(Some("all20"), Some("ship50"), "u1")
            .await
            .unwrap();

        assert_eq!(ledger.entry(&SlotKey::for_user(&ship, "u1")).consumed, 0);
        assert_eq!(ledger.entry(&SlotKey::for_user(&all, "u1")).consumed, 0);
    }

    #[tokio::test]
    async fn double_restore_stays_at_zero() {
        let (refunds, catalog, ledger) = setup();
        let ship = catalog.get("ship50").unwrap();
        ledger.try_consume(&ship, "u1").unwrap();

        for _ in 0..2 {
            refunds
                .restore_for_cancelled_order(None, Some("ship50"), "u1")
                .await
                .unwrap();
        }
        assert_eq!(ledger.remaining(&ship, "u1"), Some(1));
    }

    #[tokio::test]
    async fn nothing_to_restore() {
        let (refunds, _, _) = setup();
        assert!(refunds.restore_for_cancelled_order(None, None, "u1").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_voucher_is_reported() {
        let (refunds, _, _) = setup();
        assert_eq!(
            refunds.restore_for_cancelled_order(Some("gone"), None, "u1").await,
            Err(RefundError::NotFound("gone".to_string()))
        );
    }
}
