//! User profile store.
//!
//! Profiles are owned outside the engine; this in-memory store stands in for
//! that collaborator and exposes the same version-guarded update it offers.

use std::collections::BTreeSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::Amount;
use crate::model::{RewardId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub id: UserId,
    /// Completed-order spending, recomputed by the order side.
    pub total_spending: Amount,
    pub claimed_reward_ids: BTreeSet<RewardId>,
    pub referred_by: Option<UserId>,
    pub referrals: BTreeSet<UserId>,
    pub version: u64,
}

impl UserProfile {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn has_claimed(&self, reward: &str) -> bool {
        self.claimed_reward_ids.contains(reward)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("user {0} not found")]
    NotFound(UserId),
    #[error("profile of user {0} changed concurrently")]
    VersionConflict(UserId),
}

#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: DashMap<UserId, UserProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the profile if it does not exist yet. Returns the stored profile.
    pub fn register(&self, user: &str) -> UserProfile {
        self.profiles
            .entry(user.to_string())
            .or_insert_with(|| UserProfile::new(user))
            .value()
            .clone()
    }

    pub fn get(&self, user: &str) -> Option<UserProfile> {
        self.profiles.get(user).map(|p| p.value().clone())
    }

    /// Overwrite the spending total, creating the profile when missing.
    pub fn set_total_spending(&self, user: &str, total: Amount) -> UserProfile {
        let mut profile = self
            .profiles
            .entry(user.to_string())
            .or_insert_with(|| UserProfile::new(user));
        profile.total_spending = total;
        profile.version += 1;
        profile.clone()
    }

    /// Add `reward` to the claimed set if the profile is still at `expected_version`.
    pub fn add_claimed_reward(
        &self,
        user: &str,
        reward: &str,
        expected_version: u64,
    ) -> Result<UserProfile, ProfileError> {
        self.update(user, expected_version, |p| {
            p.claimed_reward_ids.insert(reward.to_string());
        })
    }

    pub fn set_referred_by(
        &self,
        user: &str,
        referrer: &str,
        expected_version: u64,
    ) -> Result<UserProfile, ProfileError> {
        self.update(user, expected_version, |p| {
            p.referred_by = Some(referrer.to_string());
        })
    }

    pub fn add_referral(
        &self,
        user: &str,
        referee: &str,
        expected_version: u64,
    ) -> Result<UserProfile, ProfileError> {
        self.update(user, expected_version, |p| {
            p.referrals.insert(referee.to_string());
        })
    }

    fn update(
        &self,
        user: &str,
        expected_version: u64,
        apply: impl FnOnce(&mut UserProfile),
    ) -> Result<UserProfile, ProfileError> {
        match self.profiles.entry(user.to_string()) {
            Entry::Vacant(_) => Err(ProfileError::NotFound(user.to_string())),
            Entry::Occupied(mut slot) => {
                let profile = slot.get_mut();
                if profile.version != expected_version {
                    return Err(ProfileError::VersionConflict(user.to_string()));
                }
                apply(profile);
                profile.version += 1;
                Ok(profile.clone())
            }
        }
    }
}
