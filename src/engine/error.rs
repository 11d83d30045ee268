//! Error types for promotion processing.

use thiserror::Error;

use crate::Amount;
use crate::catalog::CatalogError;
use crate::model::{RewardId, UserId, VoucherId};

/// Top-level error returned by [`PromoEngine`](super::PromoEngine) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("redemption failed: {0}")]
    Redemption(#[from] RedemptionError),

    #[error("price preview failed: {0}")]
    Pricing(#[from] PricingError),

    #[error("reward claim failed: {0}")]
    Claim(#[from] ClaimError),

    #[error("refund failed: {0}")]
    Refund(#[from] RefundError),

    #[error("referral failed: {0}")]
    Referral(#[from] ReferralError),

    #[error("{0}")]
    Catalog(#[from] CatalogError),
}

impl EngineError {
    /// Transient failures the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Redemption(RedemptionError::ConcurrencyConflict(..))
                | EngineError::Claim(ClaimError::ConcurrencyConflict(..))
                | EngineError::Refund(RefundError::ConcurrencyConflict(..))
                | EngineError::Referral(ReferralError::ConcurrencyConflict(..))
        )
    }
}

/// Why a voucher cannot be used for a given user, cart, or target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    Inactive,
    TargetMismatch,
    NotAssigned,
    BelowMinimum { required: Amount, actual: Amount },
    /// The voucher record breaks its own invariants.
    InvalidConfig(String),
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligibility::Inactive => write!(f, "voucher is inactive"),
            Ineligibility::TargetMismatch => write!(f, "voucher does not apply to this target"),
            Ineligibility::NotAssigned => write!(f, "voucher is not assigned to this user"),
            Ineligibility::BelowMinimum { required, actual } => {
                write!(f, "order total {actual} is below the minimum {required}")
            }
            Ineligibility::InvalidConfig(reason) => write!(f, "invalid discount config: {reason}"),
        }
    }
}

/// Error during voucher redemption at order confirmation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedemptionError {
    #[error("voucher {0} not found")]
    NotFound(VoucherId),

    #[error("voucher {0} is outside its validity window")]
    Expired(VoucherId),

    #[error("voucher {0} not eligible: {1}")]
    NotEligible(VoucherId, Ineligibility),

    #[error("voucher {0} has no slots left for user {1}")]
    QuotaExhausted(VoucherId, UserId),

    #[error("voucher {0} still contended after {1} attempts")]
    ConcurrencyConflict(VoucherId, u32),
}

/// Error during checkout price preview.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("voucher {0} not found")]
    NotFound(VoucherId),

    #[error("voucher {0} not eligible: {1}")]
    NotEligible(VoucherId, Ineligibility),
}

/// Error during a rank reward claim.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("reward {0} not found")]
    RewardNotFound(RewardId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("reward {0} already claimed by user {1}")]
    AlreadyClaimed(RewardId, UserId),

    #[error("reward {reward} requires rank {required}, user is {current}")]
    RankInsufficient {
        reward: RewardId,
        required: String,
        current: String,
    },

    #[error("profile of user {0} still contended after {1} attempts")]
    ConcurrencyConflict(UserId, u32),

    #[error("reward {0} was claimed but its voucher could not be minted: {1}")]
    MintFailed(RewardId, CatalogError),
}

/// Error while giving quota back for a cancelled order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefundError {
    #[error("voucher {0} not found")]
    NotFound(VoucherId),

    #[error("voucher {0} still contended after {1} attempts")]
    ConcurrencyConflict(VoucherId, u32),
}

/// Error during referral voucher issuance.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferralError {
    #[error("user {0} cannot refer themselves")]
    SelfReferral(UserId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("user {user} was already referred by {existing}")]
    AlreadyReferred { user: UserId, existing: UserId },

    #[error("profile of user {0} still contended after {1} attempts")]
    ConcurrencyConflict(UserId, u32),

    #[error("referral voucher could not be issued: {0}")]
    Issue(CatalogError),
}
