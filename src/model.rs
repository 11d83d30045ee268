//! Core domain types for the promotion engine.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::Amount;
use crate::catalog::CatalogError;
use crate::rank::Rank;

/// User identifier (owned by the external profile store).
pub type UserId = String;

/// Voucher identifier.
pub type VoucherId = String;

/// Rank reward identifier.
pub type RewardId = String;

/// Menu item identifier.
pub type FoodId = String;

/// How a voucher discounts its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discount {
    /// Percentage of the base, expected within `0..=100`.
    Percent(u32),
    /// Flat amount off the base.
    Fixed(Amount),
}

/// What part of an order a voucher may be applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppliesTo {
    All,
    ShippingFee,
    SpecificFood(FoodId),
}

/// The part of an order a voucher is being used against at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Product discount on the whole cart.
    Order,
    /// Discount on the shipping fee.
    Shipping,
    /// Product discount triggered by a specific food in the cart.
    Food(FoodId),
}

impl AppliesTo {
    /// `All` matches any target.
    pub fn matches(&self, target: &Target) -> bool {
        match (self, target) {
            (AppliesTo::All, _) => true,
            (AppliesTo::ShippingFee, Target::Shipping) => true,
            (AppliesTo::SpecificFood(food), Target::Food(wanted)) => food == wanted,
            _ => false,
        }
    }

    pub fn is_shipping(&self) -> bool {
        matches!(self, AppliesTo::ShippingFee)
    }
}

/// Who can see and redeem a voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Public,
    /// Restricted to the assigned users.
    Private(HashSet<UserId>),
}

impl Visibility {
    /// Private visibility scoped to a single user.
    pub fn only(user: &str) -> Self {
        Visibility::Private(HashSet::from([user.to_string()]))
    }

    pub fn admits(&self, user: &str) -> bool {
        match self {
            Visibility::Public => true,
            Visibility::Private(users) => users.contains(user),
        }
    }
}

/// Redemption slots a user can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// Slots allotted to this specific user.
    PerUser(u32),
    /// Slots shared by every user of the voucher.
    Global(u32),
    Unlimited,
}

/// A discount voucher and its static constraints.
///
/// Consumption counters are not stored here; they live in the quota ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub id: VoucherId,
    /// Human-entered alias.
    pub code: String,
    pub discount: Discount,
    pub min_order_value: Amount,
    /// Cap on the discount, zero means uncapped.
    pub max_discount: Amount,
    pub applies_to: AppliesTo,
    /// Inclusive.
    pub valid_from: DateTime<Utc>,
    /// Exclusive.
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub visibility: Visibility,
    pub total_quantity: Option<u32>,
    pub per_user_quantity: HashMap<UserId, u32>,
}

impl Promotion {
    /// Check the record against its own invariants.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        match self.discount {
            Discount::Percent(p) if p > 100 => {
                return Err(format!("percent discount {p} is above 100"));
            }
            Discount::Fixed(amount) if amount.is_negative() => {
                return Err(format!("fixed discount {amount} is negative"));
            }
            _ => {}
        }
        if self.max_discount.is_negative() {
            return Err(format!("discount cap {} is negative", self.max_discount));
        }
        if self.min_order_value.is_negative() {
            return Err(format!("minimum order {} is negative", self.min_order_value));
        }
        if self.valid_until < self.valid_from {
            return Err("validity window ends before it starts".to_string());
        }
        match &self.visibility {
            Visibility::Private(users) if users.is_empty() => {
                return Err("private voucher has no assigned users".to_string());
            }
            Visibility::Public if !self.per_user_quantity.is_empty() => {
                return Err("per-user quantities require a private voucher".to_string());
            }
            Visibility::Private(users) => {
                if let Some(stray) = self.per_user_quantity.keys().find(|u| !users.contains(*u)) {
                    return Err(format!("per-user quantity for unassigned user {stray}"));
                }
            }
            Visibility::Public => {}
        }
        Ok(())
    }

    /// `now` falls within `[valid_from, valid_until)`.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_until
    }

    pub fn restricts_per_user(&self) -> bool {
        !self.per_user_quantity.is_empty()
    }

    pub fn quota_for(&self, user: &str) -> Quota {
        if self.restricts_per_user() {
            Quota::PerUser(self.per_user_quantity.get(user).copied().unwrap_or(0))
        } else {
            match self.total_quantity {
                Some(total) => Quota::Global(total),
                None => Quota::Unlimited,
            }
        }
    }
}

/// Discount terms used to mint a fresh private voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherTemplate {
    pub code_prefix: String,
    pub discount: Discount,
    pub max_discount: Amount,
    pub min_order_value: Amount,
    pub applies_to: AppliesTo,
    /// Lifetime of the minted voucher.
    pub valid_for: Duration,
}

impl VoucherTemplate {
    /// Build a single-use voucher for `user`, valid from `now`.
    ///
    /// The code is the template prefix followed by `code_suffix`. Fails when
    /// the lifetime pushes the end of the window out of the representable range.
    pub fn mint(
        &self,
        id: VoucherId,
        code_suffix: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<Promotion, CatalogError> {
        let Some(valid_until) = now.checked_add_signed(self.valid_for) else {
            return Err(CatalogError::WindowOutOfRange(id));
        };
        Ok(Promotion {
            code: format!("{}-{}", self.code_prefix, code_suffix.to_ascii_uppercase()),
            id,
            discount: self.discount,
            min_order_value: self.min_order_value,
            max_discount: self.max_discount,
            applies_to: self.applies_to.clone(),
            valid_from: now,
            valid_until,
            is_active: true,
            visibility: Visibility::only(user),
            total_quantity: None,
            per_user_quantity: HashMap::from([(user.to_string(), 1)]),
        })
    }
}

/// A rank-gated benefit that can be claimed once per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankReward {
    pub id: RewardId,
    pub title: String,
    pub description: String,
    pub rank_required: Rank,
    pub template: VoucherTemplate,
}

/// Proof of a consumed slot, kept by the order so it can be restored later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionToken {
    pub voucher_id: VoucherId,
    pub user_id: UserId,
    pub consumed_at: DateTime<Utc>,
}

/// An order-lifecycle event fed to the engine by the order side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Overwrite a user's completed-order spending total.
    RecordSpending { user: UserId, total: Amount },
    /// Confirm one voucher of an order.
    Redeem {
        user: UserId,
        voucher: VoucherId,
        cart_total: Amount,
        target: Target,
    },
    /// Give back the vouchers of a cancelled order.
    Cancel {
        user: UserId,
        product_voucher: Option<VoucherId>,
        shipping_voucher: Option<VoucherId>,
    },
    /// Claim a rank reward.
    Claim { user: UserId, reward: RewardId },
}

/// Price breakdown of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderDiscountBreakdown {
    pub subtotal: Amount,
    pub shipping_fee: Amount,
    pub product_discount: Amount,
    pub shipping_discount: Amount,
    pub total: Amount,
}
