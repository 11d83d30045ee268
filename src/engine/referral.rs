use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ReferralError;
use crate::catalog::{CatalogError, PromotionCatalog};
use crate::model::{Visibility, VoucherId, VoucherTemplate};
use crate::profile::{ProfileError, ProfileStore};
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Vouchers granted to the two parties of a referral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralVouchers {
    pub referee: VoucherId,
    pub referrer: VoucherId,
}

/// Links a new user to the user who invited them and rewards both.
///
/// The steps are not atomic as a group. Each one is idempotent on its own, so
/// a failed run is repaired by running it again with the same arguments.
#[derive(Debug, Clone)]
pub struct ReferralIssuer {
    catalog: Arc<PromotionCatalog>,
    profiles: Arc<ProfileStore>,
    retry: RetryPolicy,
}

impl ReferralIssuer {
    pub fn new(catalog: Arc<PromotionCatalog>, profiles: Arc<ProfileStore>, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            profiles,
            retry,
        }
    }

    /// Apply a referral of `referee` by `referrer`:
    /// - Record the referrer on the referee's profile
    /// - Record the referee on the referrer's profile
    /// - Grant each party a private voucher minted from `template`
    pub async fn apply(
        &self,
        referee: &str,
        referrer: &str,
        template: &VoucherTemplate,
        now: DateTime<Utc>,
    ) -> Result<ReferralVouchers, ReferralError> {
        if referee == referrer {
            return Err(ReferralError::SelfReferral(referee.to_string()));
        }
        if self.profiles.get(referrer).is_none() {
            return Err(ReferralError::UserNotFound(referrer.to_string()));
        }

        self.link_referee(referee, referrer).await?;
        self.link_referrer(referee, referrer).await?;

        let vouchers = ReferralVouchers {
            referee: self.grant(template, referee, referee, "NEW", now)?,
            referrer: self.grant(template, referee, referrer, "INVITE", now)?,
        };
        info!(referee, referrer, "referral vouchers issued");
        Ok(vouchers)
    }

    async fn link_referee(&self, referee: &str, referrer: &str) -> Result<(), ReferralError> {
        retry_on_conflict(
            &self.retry,
            "referral.referred_by",
            |e| matches!(e, ReferralError::ConcurrencyConflict(..)),
            || {
                let profile = self
                    .profiles
                    .get(referee)
                    .ok_or_else(|| ReferralError::UserNotFound(referee.to_string()))?;
                match profile.referred_by.as_deref() {
                    Some(existing) if existing == referrer => Ok(()),
                    Some(existing) => Err(ReferralError::AlreadyReferred {
                        user: referee.to_string(),
                        existing: existing.to_string(),
                    }),
                    None => self
                        .profiles
                        .set_referred_by(referee, referrer, profile.version)
                        .map(|_| ())
                        .map_err(|e| self.profile_error(e)),
                }
            },
        )
        .await
    }

    async fn link_referrer(&self, referee: &str, referrer: &str) -> Result<(), ReferralError> {
        retry_on_conflict(
            &self.retry,
            "referral.referrals",
            |e| matches!(e, ReferralError::ConcurrencyConflict(..)),
            || {
                let profile = self
                    .profiles
                    .get(referrer)
                    .ok_or_else(|| ReferralError::UserNotFound(referrer.to_string()))?;
                if profile.referrals.contains(referee) {
                    return Ok(());
                }
                self.profiles
                    .add_referral(referrer, referee, profile.version)
                    .map(|_| ())
                    .map_err(|e| self.profile_error(e))
            },
        )
        .await
    }

    /// Mint the voucher under a deterministic id.
    ///
    /// An existing voucher under that id counts as granted only when it is
    /// assigned to `owner` alone.
    fn grant(
        &self,
        template: &VoucherTemplate,
        referee: &str,
        owner: &str,
        role: &str,
        now: DateTime<Utc>,
    ) -> Result<VoucherId, ReferralError> {
        let key = referral_key(referee, owner);
        let id = key.to_string();
        let voucher = template
            .mint(id.clone(), &format!("{role}-{}", key.simple()), owner, now)
            .map_err(ReferralError::Issue)?;
        match self.catalog.create(voucher) {
            Ok(()) => Ok(id),
            Err(CatalogError::DuplicateId(existing)) => match self.catalog.get(&existing) {
                Some(voucher) if voucher.visibility == Visibility::only(owner) => Ok(id),
                _ => {
                    warn!(voucher = %existing, owner, "referral voucher id is held by another voucher");
                    Err(ReferralError::Issue(CatalogError::DuplicateId(existing)))
                }
            },
            Err(e) => Err(ReferralError::Issue(e)),
        }
    }

    fn profile_error(&self, e: ProfileError) -> ReferralError {
        match e {
            ProfileError::NotFound(user) => ReferralError::UserNotFound(user),
            ProfileError::VersionConflict(user) => {
                ReferralError::ConcurrencyConflict(user, self.retry.attempts())
            }
        }
    }
}

/// Stable id for the voucher `owner` receives from the referral of `referee`.
///
/// The referee is length-prefixed so that ids stay distinct whatever
/// separators the user ids contain.
fn referral_key(referee: &str, owner: &str) -> Uuid {
    let name = format!("{}:{referee}:{owner}", referee.len());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}
