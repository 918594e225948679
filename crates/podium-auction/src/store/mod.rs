//! The bid store: one row per bidder plus a single aggregate row.
//!
//! [`BidStore`] is the seam behind which durable state lives. The ranking
//! queries in [`crate::ranking`] are layered on top of it as an extension
//! trait, so any store that can answer the primitive queries below can be
//! ranked.
//!
//! The only write that touches more than one row is [`BidStore::apply_bid`],
//! which must update the bidder's row and the aggregate row as one unit.

use std::{
    cmp::Ordering,
    collections::BTreeSet,
};

use async_trait::async_trait;
use eyre::Result;
use jiff::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};

use crate::badge::Badge;

mod in_memory;

pub use in_memory::InMemoryBidStore;

/// Whether a percentage boost applies to every amount a bidder submits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum BoostStatus {
    #[default]
    None,
    AllowListed,
}

impl BoostStatus {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::AllowListed)
    }
}

impl From<BoostStatus> for u8 {
    fn from(value: BoostStatus) -> Self {
        match value {
            BoostStatus::None => 0,
            BoostStatus::AllowListed => 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown boost status `{0}`")]
pub struct UnknownBoostStatus(u8);

impl TryFrom<u8> for BoostStatus {
    type Error = UnknownBoostStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::AllowListed),
            other => Err(UnknownBoostStatus(other)),
        }
    }
}

/// The position of a bid in the leaderboard ordering.
///
/// Higher amounts come first; at equal amounts the earlier timestamp wins.
/// A key that compares *less* than another is ranked *ahead* of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RankKey {
    pub amount: u64,
    pub timestamp: Timestamp,
}

impl RankKey {
    #[must_use]
    pub fn new(amount: u64, timestamp: Timestamp) -> Self {
        Self {
            amount,
            timestamp,
        }
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .amount
            .cmp(&self.amount)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidderRecord {
    pub bidder: String,
    /// The current effective (post-boost) amount. Zero for registered bidders that
    /// have not bid yet.
    pub amount: u64,
    pub timestamp: Timestamp,
    pub boost_status: BoostStatus,
    pub note: String,
    pub badges: BTreeSet<Badge>,
    pub bid_count: u64,
}

impl BidderRecord {
    /// A registered bidder that has not placed a bid yet.
    #[must_use]
    pub fn registered(bidder: String, boost_status: BoostStatus, timestamp: Timestamp) -> Self {
        Self {
            bidder,
            amount: 0,
            timestamp,
            boost_status,
            note: String::new(),
            badges: BTreeSet::new(),
            bid_count: 0,
        }
    }

    /// Zero amount rows sit outside the leaderboard.
    #[must_use]
    pub fn is_ranked(&self) -> bool {
        self.amount > 0
    }

    #[must_use]
    pub fn rank_key(&self) -> RankKey {
        RankKey::new(self.amount, self.timestamp)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_bids: u64,
    /// Bidders that placed at least one amount increasing bid.
    pub unique_bidders: u64,
}

/// A fully validated bid, ready to be written.
#[derive(Clone, Debug)]
pub struct BidWrite {
    pub bidder: String,
    pub amount: u64,
    pub note: String,
    pub accepted_at: Timestamp,
    /// The amount the bid was validated against. The write is refused if the stored
    /// amount changed in the meantime.
    pub expected_previous: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Written {
        /// The acceptance timestamp actually stored, unique across all rows.
        timestamp: Timestamp,
        stats_before: AggregateStats,
        stats_after: AggregateStats,
    },
    /// The stored amount no longer matched [`BidWrite::expected_previous`].
    Stale { current: u64 },
}

#[async_trait]
pub trait BidStore: Send + Sync + 'static {
    async fn get_bidder(&self, bidder: &str) -> Result<Option<BidderRecord>>;

    async fn get_stats(&self) -> Result<AggregateStats>;

    /// Counts ranked rows whose key is strictly ahead of `key`.
    async fn count_ahead(&self, key: RankKey) -> Result<u64>;

    /// Returns up to `limit` ranked rows in leaderboard order, skipping the first `offset`.
    async fn ranked_range(&self, offset: usize, limit: usize) -> Result<Vec<BidderRecord>>;

    /// Upserts the bidder row and updates the aggregate row in a single atomic unit.
    async fn apply_bid(&self, write: BidWrite) -> Result<Applied>;

    /// Unions `badges` into the bidder's persisted set, returning the resulting set.
    async fn merge_badges(&self, bidder: &str, badges: &BTreeSet<Badge>)
        -> Result<BTreeSet<Badge>>;

    /// Registers `bidder` with a zero amount, or sets the boost on an existing row.
    ///
    /// Returns `true` if a new row was created.
    async fn seed_bidder(&self, bidder: &str, boost_status: BoostStatus) -> Result<bool>;
}
