//! Per-voucher redemption counters.
//!
//! Every mutation goes through [`QuotaLedger::compare_and_set`], a single
//! version-guarded write. Callers observe a lost race as
//! [`LedgerError::ConcurrencyConflict`] and decide whether to retry.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::debug;

use crate::model::{Promotion, Quota, UserId, VoucherId};

/// Identifies one counter: per user for per-user quotas, shared otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub voucher: VoucherId,
    /// `None` for the voucher-wide counter.
    pub user: Option<UserId>,
}

impl SlotKey {
    pub fn for_user(promotion: &Promotion, user: &str) -> Self {
        Self {
            voucher: promotion.id.clone(),
            user: promotion.restricts_per_user().then(|| user.to_string()),
        }
    }
}

/// Counter state. A missing entry reads as the default (nothing consumed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerEntry {
    pub consumed: u32,
    pub version: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("voucher {voucher} has no slots left ({consumed}/{allotted} used)")]
    QuotaExhausted {
        voucher: VoucherId,
        consumed: u32,
        allotted: u32,
    },
    #[error("voucher {voucher} was modified concurrently")]
    ConcurrencyConflict { voucher: VoucherId },
}

#[derive(Debug, Default)]
pub struct QuotaLedger {
    entries: DashMap<SlotKey, LedgerEntry>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &SlotKey) -> LedgerEntry {
        self.entries.get(key).map(|e| *e.value()).unwrap_or_default()
    }

    /// Consume one slot of `promotion` for `user`.
    ///
    /// Single attempt: a concurrent writer between the read and the guarded
    /// write yields `ConcurrencyConflict`.
    pub fn try_consume(&self, promotion: &Promotion, user: &str) -> Result<LedgerEntry, LedgerError> {
        let key = SlotKey::for_user(promotion, user);
        let current = self.entry(&key);

        let allotted = match promotion.quota_for(user) {
            Quota::PerUser(n) | Quota::Global(n) => Some(n),
            Quota::Unlimited => None,
        };
        if let Some(allotted) = allotted {
            if current.consumed >= allotted {
                return Err(LedgerError::QuotaExhausted {
                    voucher: promotion.id.clone(),
                    consumed: current.consumed,
                    allotted,
                });
            }
        }

        self.compare_and_set(&key, current.version, current.consumed.saturating_add(1))
            .ok_or_else(|| LedgerError::ConcurrencyConflict {
                voucher: promotion.id.clone(),
            })
    }

    /// Give back one slot of `promotion` for `user`, never going below zero.
    pub fn try_restore(&self, promotion: &Promotion, user: &str) -> Result<LedgerEntry, LedgerError> {
        let key = SlotKey::for_user(promotion, user);
        let current = self.entry(&key);
        if current.consumed == 0 {
            debug!(voucher = %promotion.id, user, "nothing to restore");
            return Ok(current);
        }

        self.compare_and_set(&key, current.version, current.consumed - 1)
            .ok_or_else(|| LedgerError::ConcurrencyConflict {
                voucher: promotion.id.clone(),
            })
    }

    /// Slots `user` can still draw, `None` when the voucher is unlimited.
    pub fn remaining(&self, promotion: &Promotion, user: &str) -> Option<u32> {
        let consumed = self.entry(&SlotKey::for_user(promotion, user)).consumed;
        match promotion.quota_for(user) {
            Quota::PerUser(n) | Quota::Global(n) => Some(n.saturating_sub(consumed)),
            Quota::Unlimited => None,
        }
    }

    /// All counters, sorted by key.
    pub fn snapshot(&self) -> Vec<(SlotKey, LedgerEntry)> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Write `consumed` only if the entry is still at `expected_version`.
    ///
    /// Returns the new entry, or `None` when the guard fails.
    fn compare_and_set(&self, key: &SlotKey, expected_version: u64, consumed: u32) -> Option<LedgerEntry> {
        let next = LedgerEntry {
            consumed,
            version: expected_version + 1,
        };
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) if slot.get().version == expected_version => {
                *slot.get_mut() = next;
                Some(next)
            }
            Entry::Vacant(slot) if expected_version == 0 => {
                slot.insert(next);
                Some(next)
            }
            _ => None,
        }
    }
}
