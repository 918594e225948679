//! An in-memory bid store with an ordered leaderboard index.

use std::collections::{
    BTreeSet,
    HashMap,
};

use async_trait::async_trait;
use eyre::{
    eyre,
    Result,
    WrapErr as _,
};
use jiff::{
    SignedDuration,
    Timestamp,
};
use tokio::sync::RwLock;
use tracing::{
    debug,
    instrument,
};

use super::{
    AggregateStats,
    Applied,
    BidStore,
    BidWrite,
    BidderRecord,
    BoostStatus,
    RankKey,
};
use crate::badge::Badge;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, BidderRecord>,
    /// Ranked rows only, that is rows with a non-zero amount.
    index: BTreeSet<(RankKey, String)>,
    stats: AggregateStats,
    last_timestamp: Option<Timestamp>,
}

impl Tables {
    /// Returns a timestamp that is unique across all writes, at or after `requested`.
    fn serialize_timestamp(&mut self, requested: Timestamp) -> Result<Timestamp> {
        let timestamp = match self.last_timestamp {
            Some(last) if requested <= last => last
                .checked_add(SignedDuration::from_nanos(1))
                .wrap_err("acceptance timestamp overflowed")?,
            _ => requested,
        };
        self.last_timestamp = Some(timestamp);
        Ok(timestamp)
    }
}

/// A [`BidStore`] keeping rows, leaderboard index and aggregate row behind a
/// single lock, so that every write is one critical section.
#[derive(Default)]
pub struct InMemoryBidStore {
    tables: RwLock<Tables>,
}

impl InMemoryBidStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BidStore for InMemoryBidStore {
    async fn get_bidder(&self, bidder: &str) -> Result<Option<BidderRecord>> {
        Ok(self.tables.read().await.rows.get(bidder).cloned())
    }

    async fn get_stats(&self) -> Result<AggregateStats> {
        Ok(self.tables.read().await.stats)
    }

    async fn count_ahead(&self, key: RankKey) -> Result<u64> {
        let tables = self.tables.read().await;
        let ahead = tables.index.range(..(key, String::new())).count();
        u64::try_from(ahead).wrap_err("number of ranked rows does not fit into u64")
    }

    async fn ranked_range(&self, offset: usize, limit: usize) -> Result<Vec<BidderRecord>> {
        let tables = self.tables.read().await;
        tables
            .index
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(_, bidder)| {
                tables
                    .rows
                    .get(bidder)
                    .cloned()
                    .ok_or_else(|| eyre!("leaderboard index refers to missing bidder `{bidder}`"))
            })
            .collect()
    }

    #[instrument(skip_all, fields(bidder = %write.bidder, amount = write.amount), err)]
    async fn apply_bid(&self, write: BidWrite) -> Result<Applied> {
        let BidWrite {
            bidder,
            amount,
            note,
            accepted_at,
            expected_previous,
        } = write;

        let mut guard = self.tables.write().await;
        let current = guard.rows.get(&bidder).map_or(0, |row| row.amount);
        if current != expected_previous || amount <= current {
            debug!(current, expected_previous, "refusing stale bid write");
            return Ok(Applied::Stale {
                current,
            });
        }
        let timestamp = guard.serialize_timestamp(accepted_at)?;

        let Tables {
            rows,
            index,
            stats,
            ..
        } = &mut *guard;
        let stats_before = *stats;
        let row = rows.entry(bidder.clone()).or_insert_with(|| {
            BidderRecord::registered(bidder.clone(), BoostStatus::None, timestamp)
        });
        if row.is_ranked() {
            index.remove(&(row.rank_key(), bidder.clone()));
        }
        row.amount = amount;
        row.timestamp = timestamp;
        row.note = note;
        row.bid_count = row.bid_count.saturating_add(1);
        index.insert((row.rank_key(), bidder));

        stats.total_bids = stats.total_bids.saturating_add(1);
        if current == 0 {
            stats.unique_bidders = stats.unique_bidders.saturating_add(1);
        }

        Ok(Applied::Written {
            timestamp,
            stats_before,
            stats_after: *stats,
        })
    }

    async fn merge_badges(
        &self,
        bidder: &str,
        badges: &BTreeSet<Badge>,
    ) -> Result<BTreeSet<Badge>> {
        let mut tables = self.tables.write().await;
        let row = tables
            .rows
            .get_mut(bidder)
            .ok_or_else(|| eyre!("cannot merge badges into missing bidder `{bidder}`"))?;
        row.badges.extend(badges.iter().copied());
        Ok(row.badges.clone())
    }

    async fn seed_bidder(&self, bidder: &str, boost_status: BoostStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.rows.get_mut(bidder) {
            row.boost_status = boost_status;
            return Ok(false);
        }
        let record = BidderRecord::registered(bidder.to_string(), boost_status, Timestamp::now());
        tables.rows.insert(bidder.to_string(), record);
        Ok(true)
    }
}
