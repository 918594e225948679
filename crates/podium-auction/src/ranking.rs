//! Ranking queries over a [`BidStore`].
//!
//! Ranks are never stored. They are recomputed from the current contents of the
//! store on every call, using the ordering defined by [`RankKey`].

use async_trait::async_trait;
use eyre::{
    Result,
    WrapErr as _,
};
use serde::Serialize;

use crate::store::{
    BidStore,
    BidderRecord,
    RankKey,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedBidder {
    pub rank: u64,
    #[serde(flatten)]
    pub record: BidderRecord,
}

#[async_trait]
pub trait RankingExt: BidStore {
    /// The rank a bid with `key` holds: one more than the number of rows ahead of it.
    async fn rank(&self, key: RankKey) -> Result<u64> {
        let ahead = self.count_ahead(key).await?;
        Ok(ahead.saturating_add(1))
    }

    /// The rank of `record`, or `None` if it has not bid yet.
    async fn rank_of(&self, record: &BidderRecord) -> Result<Option<u64>> {
        if !record.is_ranked() {
            return Ok(None);
        }
        self.rank(record.rank_key()).await.map(Some)
    }

    /// The first `limit` ranked bidders in leaderboard order.
    async fn leaderboard(&self, limit: usize) -> Result<Vec<RankedBidder>> {
        let records = self
            .ranked_range(0, limit)
            .await
            .wrap_err("failed reading leaderboard rows")?;
        Ok((1..)
            .zip(records)
            .map(|(rank, record)| RankedBidder {
                rank,
                record,
            })
            .collect())
    }

    /// The uniform price every winner pays: the amount of the first bidder outside the
    /// winning list, or `entry_amount` if the winning list is not oversubscribed.
    async fn clearing_price(&self, size: u64, entry_amount: u64) -> Result<u64> {
        let position = usize::try_from(size).wrap_err("auction size does not fit into usize")?;
        let first_loser = self
            .ranked_range(position, 1)
            .await
            .wrap_err("failed reading first losing bid")?;
        Ok(first_loser
            .first()
            .map_or(entry_amount, |record| record.amount))
    }

    /// The bidders currently inside the winning list, best first.
    async fn winners(&self, size: u64) -> Result<Vec<String>> {
        let limit = usize::try_from(size).wrap_err("auction size does not fit into usize")?;
        let records = self
            .ranked_range(0, limit)
            .await
            .wrap_err("failed reading winning list")?;
        Ok(records.into_iter().map(|record| record.bidder).collect())
    }
}

impl<T: BidStore + ?Sized> RankingExt for T {}
