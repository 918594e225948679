//! Achievement badges.
//!
//! There are two disjoint classes of badges, each computed by a pure function:
//!
//! - [`static_badges`] looks at the transition caused by a single accepted bid. Its
//!   result is merged into the bidder's persisted set and never removed again.
//! - [`dynamic_badges`] looks at a bidder's current standing. Its result is attached
//!   to views handed out to callers and never persisted, so these badges come and go
//!   as other bidders move the leaderboard.

use std::collections::BTreeSet;

use serde::{
    Deserialize,
    Serialize,
};

/// Badge identifiers. The derived ordering (declaration order) is the order in which
/// badges are persisted and displayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    // static: size of the jump between the previous and the new amount
    #[serde(rename = "jump_100")]
    Jump100,
    #[serde(rename = "jump_1k")]
    Jump1k,
    #[serde(rename = "jump_10k")]
    Jump10k,
    #[serde(rename = "jump_100k")]
    Jump100k,
    // static: ranks climbed with a single bid
    #[serde(rename = "climb_10")]
    Climb10,
    #[serde(rename = "climb_50")]
    Climb50,
    #[serde(rename = "climb_100")]
    Climb100,
    // static: joined while the auction had few participants
    #[serde(rename = "early_10")]
    Early10,
    #[serde(rename = "early_100")]
    Early100,
    #[serde(rename = "early_1000")]
    Early1000,
    TookFirst,
    // dynamic: current position
    #[serde(rename = "top_1")]
    Top1,
    #[serde(rename = "top_3")]
    Top3,
    #[serde(rename = "top_10")]
    Top10,
    #[serde(rename = "top_21")]
    Top21,
    #[serde(rename = "top_100")]
    Top100,
    InWinningList,
    RoundTen,
    RoundHundred,
    LastSlot,
    // dynamic: number of accepted bids
    #[serde(rename = "bids_2")]
    Bids2,
    #[serde(rename = "bids_5")]
    Bids5,
    #[serde(rename = "bids_10")]
    Bids10,
    #[serde(rename = "bids_20")]
    Bids20,
}

/// Tiers are ordered from highest to lowest; only the first matching tier is awarded.
const JUMP_TIERS: [(u64, Badge); 4] = [
    (100_000, Badge::Jump100k),
    (10_000, Badge::Jump10k),
    (1_000, Badge::Jump1k),
    (100, Badge::Jump100),
];

const CLIMB_TIERS: [(u64, Badge); 3] = [
    (100, Badge::Climb100),
    (50, Badge::Climb50),
    (10, Badge::Climb10),
];

/// Awarded cumulatively while the number of unique bidders is below the threshold.
const EARLY_THRESHOLDS: [(u64, Badge); 3] = [
    (10, Badge::Early10),
    (100, Badge::Early100),
    (1_000, Badge::Early1000),
];

/// Awarded cumulatively while the rank is at or below the threshold.
const TOP_TIERS: [(u64, Badge); 5] = [
    (1, Badge::Top1),
    (3, Badge::Top3),
    (10, Badge::Top10),
    (21, Badge::Top21),
    (100, Badge::Top100),
];

const PERIODIC_TIERS: [(u64, Badge); 2] = [(100, Badge::RoundHundred), (10, Badge::RoundTen)];

const BID_COUNT_TIERS: [(u64, Badge); 4] = [
    (20, Badge::Bids20),
    (10, Badge::Bids10),
    (5, Badge::Bids5),
    (2, Badge::Bids2),
];

fn highest_tier(value: u64, tiers: &[(u64, Badge)]) -> Option<Badge> {
    tiers
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map(|(_, badge)| *badge)
}

/// The before and after of a single accepted bid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub old_amount: u64,
    pub new_amount: u64,
    /// The rank before the bid, `None` if the bidder was not ranked.
    pub old_rank: Option<u64>,
    pub new_rank: u64,
    /// Ranked bidders after the bid. Bidders without a prior rank climb from here.
    pub ranked_bidders: u64,
    /// Unique bidders at the moment the bid was placed, not counting this bidder if
    /// this was its first bid.
    pub unique_bidders: u64,
}

#[must_use]
pub fn static_badges(transition: &Transition) -> BTreeSet<Badge> {
    let Transition {
        old_amount,
        new_amount,
        old_rank,
        new_rank,
        ranked_bidders,
        unique_bidders,
    } = *transition;

    let mut badges = BTreeSet::new();
    badges.extend(highest_tier(
        new_amount.saturating_sub(old_amount),
        &JUMP_TIERS,
    ));
    badges.extend(highest_tier(
        old_rank
            .unwrap_or(ranked_bidders)
            .saturating_sub(new_rank),
        &CLIMB_TIERS,
    ));
    badges.extend(
        EARLY_THRESHOLDS
            .iter()
            .filter(|(threshold, _)| unique_bidders < *threshold)
            .map(|(_, badge)| *badge),
    );
    if new_rank == 1 && old_rank != Some(1) {
        badges.insert(Badge::TookFirst);
    }
    badges
}

/// A bidder's current standing as seen by a single read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Standing {
    /// `None` for bidders without a rank.
    pub rank: Option<u64>,
    pub bid_count: u64,
    pub auction_size: u64,
    /// The last rank inside the winning list that is actually occupied, that is
    /// `min(unique_bidders, auction_size)`.
    pub effective_last_rank: u64,
}

impl Standing {
    #[must_use]
    pub fn new(rank: Option<u64>, bid_count: u64, auction_size: u64, unique_bidders: u64) -> Self {
        Self {
            rank,
            bid_count,
            auction_size,
            effective_last_rank: unique_bidders.min(auction_size),
        }
    }
}

#[must_use]
pub fn dynamic_badges(standing: &Standing) -> BTreeSet<Badge> {
    let mut badges = BTreeSet::new();
    if let Some(rank) = standing.rank {
        badges.extend(
            TOP_TIERS
                .iter()
                .filter(|(threshold, _)| rank <= *threshold)
                .map(|(_, badge)| *badge),
        );
        if rank <= standing.auction_size {
            badges.insert(Badge::InWinningList);
        }
        badges.extend(
            PERIODIC_TIERS
                .iter()
                .find(|(period, _)| rank % period == 0)
                .map(|(_, badge)| *badge),
        );
        if rank == standing.effective_last_rank {
            badges.insert(Badge::LastSlot);
        }
    }
    badges.extend(highest_tier(standing.bid_count, &BID_COUNT_TIERS));
    badges
}
