//! Checkout price preview.
//!
//! Pure computation: nothing here touches the ledger, so previews can be
//! recomputed freely before the user confirms an order.

use tracing::warn;

use crate::Amount;
use crate::engine::{Ineligibility, PricingError};
use crate::model::{AppliesTo, Discount, OrderDiscountBreakdown, Promotion};

/// Discount `promotion` grants on `base`, after the cap and clamped to `base`.
pub fn discount_on(promotion: &Promotion, base: Amount) -> Amount {
    let raw = match promotion.discount {
        Discount::Percent(percent) => base.percent(percent),
        Discount::Fixed(amount) => amount,
    };
    let capped = if promotion.max_discount > Amount::ZERO {
        raw.min(promotion.max_discount)
    } else {
        raw
    };
    capped.min(base).floor_zero()
}

/// Price breakdown for a cart with at most one product and one shipping voucher.
///
/// The two discounts act on disjoint bases (subtotal and shipping fee), so
/// the order they are applied in does not matter.
pub fn compute(
    subtotal: Amount,
    shipping_fee: Amount,
    product_voucher: Option<&Promotion>,
    shipping_voucher: Option<&Promotion>,
) -> Result<OrderDiscountBreakdown, PricingError> {
    let product_discount = match product_voucher {
        Some(promo) => {
            check_usable(promo)?;
            if promo.applies_to.is_shipping() {
                return Err(PricingError::NotEligible(promo.id.clone(), Ineligibility::TargetMismatch));
            }
            discount_on(promo, subtotal)
        }
        None => Amount::ZERO,
    };

    let shipping_discount = match shipping_voucher {
        Some(promo) => {
            check_usable(promo)?;
            if !matches!(promo.applies_to, AppliesTo::ShippingFee | AppliesTo::All) {
                return Err(PricingError::NotEligible(promo.id.clone(), Ineligibility::TargetMismatch));
            }
            discount_on(promo, shipping_fee)
        }
        None => Amount::ZERO,
    };

    let total = (subtotal + shipping_fee - product_discount - shipping_discount).floor_zero();

    Ok(OrderDiscountBreakdown {
        subtotal,
        shipping_fee,
        product_discount,
        shipping_discount,
        total,
    })
}

fn check_usable(promo: &Promotion) -> Result<(), PricingError> {
    promo.validate().map_err(|reason| {
        warn!(voucher = %promo.id, %reason, "voucher violates its own constraints");
        PricingError::NotEligible(promo.id.clone(), Ineligibility::InvalidConfig(reason))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn amt(v: i64) -> Amount {
        Amount::from_minor(v)
    }

    #[test]
    fn no_vouchers() {
        let breakdown = compute(amt(100_000), amt(15_000), None, None).unwrap();
        assert_eq!(breakdown.product_discount, Amount::ZERO);
        assert_eq!(breakdown.shipping_discount, Amount::ZERO);
        assert_eq!(breakdown.total, amt(115_000));
    }

    #[test]
    fn free_shipping_voucher() {
        let ship = ship50("u1");
        let breakdown = compute(amt(100_000), amt(15_000), None, Some(&ship)).unwrap();
        assert_eq!(breakdown.product_discount, Amount::ZERO);
        assert_eq!(breakdown.shipping_discount, amt(15_000));
        assert_eq!(breakdown.total, amt(100_000));
    }

    #[test]
    fn percent_discount_is_capped() {
        let all = all20();
        let breakdown = compute(amt(300_000), Amount::ZERO, Some(&all), None).unwrap();
        assert_eq!(breakdown.product_discount, amt(50_000));
        assert_eq!(breakdown.total, amt(250_000));
    }

    #[test]
    fn percent_discount_under_cap_is_kept() {
        let all = all20();
        assert_eq!(discount_on(&all, amt(200_000)), amt(40_000));
    }

    #[test]
    fn fixed_discount_never_exceeds_base() {
        let ship = ship50("u1");
        let breakdown = compute(amt(50_000), amt(10_000), None, Some(&ship)).unwrap();
        assert_eq!(breakdown.shipping_discount, amt(10_000));
        assert_eq!(breakdown.total, amt(50_000));
    }

    #[test]
    fn both_vouchers_stack_on_disjoint_bases() {
        let all = all20();
        let ship = ship50("u1");
        let breakdown = compute(amt(300_000), amt(15_000), Some(&all), Some(&ship)).unwrap();
        assert_eq!(breakdown.product_discount, amt(50_000));
        assert_eq!(breakdown.shipping_discount, amt(15_000));
        assert_eq!(breakdown.total, amt(250_000));
    }

    #[test]
    fn shipping_voucher_rejected_as_product_voucher() {
        let ship = ship50("u1");
        assert_eq!(
            compute(amt(100_000), amt(15_000), Some(&ship), None),
            Err(PricingError::NotEligible("ship50".to_string(), Ineligibility::TargetMismatch))
        );
    }

    #[test]
    fn food_voucher_rejected_as_shipping_voucher() {
        let pho = public(
            "pho",
            Discount::Fixed(amt(5_000)),
            AppliesTo::SpecificFood("pho".to_string()),
        );
        assert!(compute(amt(100_000), amt(15_000), None, Some(&pho)).is_err());
        assert!(compute(amt(100_000), amt(15_000), Some(&pho), None).is_ok());
    }

    #[test]
    fn invalid_voucher_is_not_eligible() {
        let broken = Promotion {
            discount: Discount::Percent(250),
            ..all20()
        };
        assert!(matches!(
            compute(amt(100_000), Amount::ZERO, Some(&broken), None),
            Err(PricingError::NotEligible(_, Ineligibility::InvalidConfig(_)))
        ));
    }

    #[test]
    fn preview_is_deterministic() {
        let all = all20();
        let ship = ship50("u1");
        let first = compute(amt(123_457), amt(17_000), Some(&all), Some(&ship));
        let second = compute(amt(123_457), amt(17_000), Some(&all), Some(&ship));
        assert_eq!(first, second);
    }

    #[test]
    fn discounts_never_exceed_gross_total() {
        let vouchers = [
            all20(),
            ship50("u1"),
            public("big", Discount::Fixed(amt(1_000_000)), AppliesTo::All),
            public("full", Discount::Percent(100), AppliesTo::All),
        ];
        for subtotal in [0, 1, 999, 50_000, 300_000] {
            for shipping in [0, 1, 15_000] {
                for product in vouchers.iter().filter(|v| !v.applies_to.is_shipping()) {
                    for ship in &vouchers {
                        let b = compute(amt(subtotal), amt(shipping), Some(product), Some(ship)).unwrap();
                        assert!(b.product_discount + b.shipping_discount <= amt(subtotal + shipping));
                        assert!(b.total >= Amount::ZERO);
                        assert_eq!(b.total, amt(subtotal + shipping) - b.product_discount - b.shipping_discount);
                    }
                }
            }
        }
    }
}
