//! Spending-based rank tiers.

use thiserror::Error;

use crate::Amount;

/// A rank tier unlocked once cumulative spending reaches `threshold`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rank {
    pub threshold: Amount,
    pub name: String,
}

impl Rank {
    pub fn new(threshold: Amount, name: impl Into<String>) -> Self {
        Self {
            threshold,
            name: name.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RankTableError {
    #[error("rank table is empty")]
    Empty,
    #[error("lowest rank must start at 0, found {0}")]
    NoBaseRank(Amount),
    #[error("rank thresholds must be strictly ascending ({0} after {1})")]
    NotAscending(Amount, Amount),
}

/// Where a user stands relative to the next tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankProgress {
    pub current: Rank,
    pub next: Option<Rank>,
    /// Spending still needed to reach `next`, zero at the top tier.
    pub remaining: Amount,
}

/// Ordered list of tiers, ascending by threshold, starting at 0.
#[derive(Debug, Clone)]
pub struct RankTable {
    ranks: Vec<Rank>,
}

impl RankTable {
    pub fn new(ranks: Vec<Rank>) -> Result<Self, RankTableError> {
        let first = ranks.first().ok_or(RankTableError::Empty)?;
        if first.threshold != Amount::ZERO {
            return Err(RankTableError::NoBaseRank(first.threshold));
        }
        for pair in ranks.windows(2) {
            if let [lower, upper] = pair {
                if upper.threshold <= lower.threshold {
                    return Err(RankTableError::NotAscending(upper.threshold, lower.threshold));
                }
            }
        }
        Ok(Self { ranks })
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Highest rank whose threshold is at or below `total_spending`.
    pub fn rank_for(&self, total_spending: Amount) -> &Rank {
        // the base rank always qualifies, so the partition point is at least 1
        let idx = self
            .ranks
            .partition_point(|rank| rank.threshold <= total_spending);
        &self.ranks[idx.saturating_sub(1)]
    }

    pub fn next_rank(&self, rank: &Rank) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.threshold > rank.threshold)
    }

    pub fn by_name(&self, name: &str) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn progress(&self, total_spending: Amount) -> RankProgress {
        let current = self.rank_for(total_spending);
        let next = self.next_rank(current);
        let remaining = next
            .map(|n| n.threshold.saturating_sub(total_spending))
            .unwrap_or(Amount::ZERO);
        RankProgress {
            current: current.clone(),
            next: next.cloned(),
            remaining,
        }
    }
}

impl Default for RankTable {
    fn default() -> Self {
        Self {
            ranks: vec![
                Rank::new(Amount::ZERO, "BRONZE"),
                Rank::new(Amount::from_minor(500_000), "SILVER"),
                Rank::new(Amount::from_minor(2_000_000), "GOLD"),
                Rank::new(Amount::from_minor(5_000_000), "PLATINUM"),
                Rank::new(Amount::from_minor(10_000_000), "DIAMOND"),
            ],
        }
    }
}
