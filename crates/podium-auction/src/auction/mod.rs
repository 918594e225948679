//! The auction service: validates, stores and ranks individual bids.
//!
//! # Placing a bid
//!
//! A bid is only accepted while the auction window is open and only if its
//! effective amount is strictly higher than the bidder's previous effective
//! amount. Allow-listed bidders get a 5% boost applied to the whole incoming
//! amount on every bid, not only to the increment over their last bid.
//!
//! Reading the previous state and writing the new state are separate store
//! operations. Submissions of the *same* bidder are serialized by a per-bidder
//! lock; submissions of different bidders interleave freely, so the rank
//! returned for a bid may already be stale when the caller observes it.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Instant,
};

use eyre::WrapErr as _;
use jiff::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::Mutex;
use tracing::{
    info,
    instrument,
    Level,
};

use crate::{
    badge::{
        self,
        Badge,
        Standing,
        Transition,
    },
    ranking::RankingExt as _,
    store::{
        AggregateStats,
        Applied,
        BidStore,
        BidWrite,
        BidderRecord,
        BoostStatus,
        RankKey,
    },
    Metrics,
};

mod note;

const BOOST_NUMERATOR: u128 = 105;
const BOOST_DENOMINATOR: u128 = 100;

/// The fixed parameters of a single auction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionParameters {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// The minimum bid, which is also the clearing price while the winning list is not
    /// oversubscribed.
    pub entry_amount: u64,
    /// The number of slots in the winning list.
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Open,
    Ended,
}

impl AuctionParameters {
    /// The auction is open in `[start_time, end_time)`.
    #[must_use]
    pub fn phase_at(&self, now: Timestamp) -> Phase {
        if now < self.start_time {
            Phase::NotStarted
        } else if now < self.end_time {
            Phase::Open
        } else {
            Phase::Ended
        }
    }
}

/// The rank of a bidder before and after an accepted bid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankDelta {
    /// `None` if the bidder had no rank before this bid.
    pub old_rank: Option<u64>,
    pub new_rank: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BidError {
    #[error("the auction has not started yet, it opens at {start_time}")]
    NotStarted { start_time: Timestamp },
    #[error("the auction has ended at {end_time}")]
    Ended { end_time: Timestamp },
    #[error("bid amount must be a positive integer")]
    NonPositiveAmount,
    #[error("boosted bid amount is too large")]
    AmountOverflow,
    #[error(
        "bid must exceed previous effective bid; previous: `{previous}`, effective: \
         `{effective}`"
    )]
    NotHigher { previous: u64, effective: u64 },
    #[error("failed accessing the bid store")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl BidError {
    fn storage(report: eyre::Report) -> Self {
        Self::Storage(report.into())
    }

    /// Returns if the bid was refused because of the auction rules rather than an
    /// unexpected failure.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// The amount a raw bid counts for after applying the bidder's boost.
///
/// Returns `None` if the boosted amount does not fit into a `u64`.
#[must_use]
pub fn effective_amount(raw_amount: u64, boost_status: BoostStatus) -> Option<u64> {
    if !boost_status.is_active() {
        return Some(raw_amount);
    }
    let boosted = u128::from(raw_amount) * BOOST_NUMERATOR / BOOST_DENOMINATOR;
    u64::try_from(boosted).ok()
}

/// A bidder as handed out to readers: the stored record, its current rank and its
/// persisted badges together with the badges describing its current standing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidderView {
    pub bidder: String,
    pub amount: u64,
    pub timestamp: Timestamp,
    pub boost_status: BoostStatus,
    pub note: String,
    pub badges: BTreeSet<Badge>,
    pub bid_count: u64,
    pub rank: Option<u64>,
}

impl BidderView {
    fn new(record: BidderRecord, rank: Option<u64>, standing_badges: BTreeSet<Badge>) -> Self {
        let BidderRecord {
            bidder,
            amount,
            timestamp,
            boost_status,
            note,
            mut badges,
            bid_count,
        } = record;
        badges.extend(standing_badges);
        Self {
            bidder,
            amount,
            timestamp,
            boost_status,
            note,
            badges,
            bid_count,
            rank,
        }
    }
}

pub struct AuctionService {
    store: Arc<dyn BidStore>,
    parameters: AuctionParameters,
    note_max_chars: usize,
    bidder_locks: papaya::HashMap<String, Arc<Mutex<()>>>,
    metrics: &'static Metrics,
}

impl AuctionService {
    #[must_use]
    pub fn new(
        store: Arc<dyn BidStore>,
        parameters: AuctionParameters,
        note_max_chars: usize,
        metrics: &'static Metrics,
    ) -> Self {
        Self {
            store,
            parameters,
            note_max_chars,
            bidder_locks: papaya::HashMap::new(),
            metrics,
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &AuctionParameters {
        &self.parameters
    }

    /// Places a bid of `raw_amount` for `bidder` at the current time.
    ///
    /// # Errors
    /// Returns an error if the auction is not open, if the amount is zero or does not
    /// exceed the bidder's previous effective amount, or if the store failed.
    pub async fn bid(
        &self,
        bidder: &str,
        raw_amount: u64,
        note: &str,
    ) -> Result<RankDelta, BidError> {
        self.bid_at(Timestamp::now(), bidder, raw_amount, note)
            .await
    }

    /// Places a bid as if it arrived at `now`.
    ///
    /// # Errors
    /// See [`Self::bid`].
    #[instrument(
        skip_all,
        fields(bidder = %bidder, raw_amount = raw_amount),
        err(level = Level::INFO)
    )]
    pub async fn bid_at(
        &self,
        now: Timestamp,
        bidder: &str,
        raw_amount: u64,
        note: &str,
    ) -> Result<RankDelta, BidError> {
        let started = Instant::now();
        let result = self.place_bid(now, bidder, raw_amount, note).await;
        match &result {
            Ok(delta) => {
                self.metrics.increment_bids_accepted();
                info!(
                    old_rank = delta.old_rank,
                    new_rank = delta.new_rank,
                    "bid accepted"
                );
            }
            Err(err) if err.is_rejection() => self.metrics.increment_bids_rejected(),
            Err(_) => {}
        }
        self.metrics
            .record_bid_processing_latency(started.elapsed());
        result
    }

    async fn place_bid(
        &self,
        now: Timestamp,
        bidder: &str,
        raw_amount: u64,
        note: &str,
    ) -> Result<RankDelta, BidError> {
        match self.parameters.phase_at(now) {
            Phase::NotStarted => {
                return Err(BidError::NotStarted {
                    start_time: self.parameters.start_time,
                });
            }
            Phase::Ended => {
                return Err(BidError::Ended {
                    end_time: self.parameters.end_time,
                });
            }
            Phase::Open => {}
        }
        if raw_amount == 0 {
            return Err(BidError::NonPositiveAmount);
        }

        let lock = self
            .bidder_locks
            .pin()
            .get_or_insert_with(bidder.to_string(), || Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let previous = self
            .store
            .get_bidder(bidder)
            .await
            .map_err(BidError::storage)?;
        let (previous_amount, boost_status, previous_note) =
            previous.as_ref().map_or((0, BoostStatus::None, ""), |record| {
                (record.amount, record.boost_status, record.note.as_str())
            });

        let effective =
            effective_amount(raw_amount, boost_status).ok_or(BidError::AmountOverflow)?;
        if effective <= previous_amount {
            return Err(BidError::NotHigher {
                previous: previous_amount,
                effective,
            });
        }

        let old_rank = match &previous {
            Some(record) => self
                .store
                .rank_of(record)
                .await
                .map_err(BidError::storage)?,
            None => None,
        };
        let note = note::merge_note(
            previous_note,
            note::truncate_note(note, self.note_max_chars),
        );

        let applied = self
            .store
            .apply_bid(BidWrite {
                bidder: bidder.to_string(),
                amount: effective,
                note,
                accepted_at: now,
                expected_previous: previous_amount,
            })
            .await
            .map_err(BidError::storage)?;
        let (timestamp, stats_before, stats_after) = match applied {
            Applied::Written {
                timestamp,
                stats_before,
                stats_after,
            } => (timestamp, stats_before, stats_after),
            Applied::Stale {
                current,
            } => {
                return Err(BidError::NotHigher {
                    previous: current,
                    effective,
                });
            }
        };
        self.metrics.set_unique_bidders(stats_after.unique_bidders);

        let new_rank = self
            .store
            .rank(RankKey::new(effective, timestamp))
            .await
            .map_err(BidError::storage)?;

        let earned = badge::static_badges(&Transition {
            old_amount: previous_amount,
            new_amount: effective,
            old_rank,
            new_rank,
            ranked_bidders: stats_after.unique_bidders,
            unique_bidders: stats_before.unique_bidders,
        });
        if !earned.is_empty() {
            self.store
                .merge_badges(bidder, &earned)
                .await
                .map_err(BidError::storage)?;
        }

        Ok(RankDelta {
            old_rank,
            new_rank,
        })
    }

    /// Registers every bidder in `bidders` as allow-listed.
    ///
    /// Returns the number of newly created rows.
    ///
    /// # Errors
    /// Returns an error if the store failed.
    #[instrument(skip_all, fields(bidders = bidders.len()), err)]
    pub async fn seed_allow_list(&self, bidders: &[String]) -> eyre::Result<usize> {
        let mut created = 0;
        for bidder in bidders {
            if self
                .store
                .seed_bidder(bidder, BoostStatus::AllowListed)
                .await
                .wrap_err_with(|| format!("failed seeding allow-listed bidder `{bidder}`"))?
            {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Returns the view of a single bidder, or `None` if the bidder is unknown.
    ///
    /// # Errors
    /// Returns an error if the store failed.
    pub async fn bidder_view(&self, bidder: &str) -> eyre::Result<Option<BidderView>> {
        let Some(record) = self
            .store
            .get_bidder(bidder)
            .await
            .wrap_err("failed reading bidder")?
        else {
            return Ok(None);
        };
        let stats = self.stats().await?;
        let rank = self.store.rank_of(&record).await?;
        let standing = self.standing_badges(rank, record.bid_count, &stats);
        Ok(Some(BidderView::new(record, rank, standing)))
    }

    /// Returns the top `limit` bidders.
    ///
    /// # Errors
    /// Returns an error if the store failed.
    pub async fn leaderboard(&self, limit: usize) -> eyre::Result<Vec<BidderView>> {
        let stats = self.stats().await?;
        let board = self.store.leaderboard(limit).await?;
        Ok(board
            .into_iter()
            .map(|entry| {
                let standing =
                    self.standing_badges(Some(entry.rank), entry.record.bid_count, &stats);
                BidderView::new(entry.record, Some(entry.rank), standing)
            })
            .collect())
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn stats(&self) -> eyre::Result<AggregateStats> {
        self.store
            .get_stats()
            .await
            .wrap_err("failed reading aggregate stats")
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn clearing_price(&self) -> eyre::Result<u64> {
        self.store
            .clearing_price(self.parameters.size, self.parameters.entry_amount)
            .await
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn winners(&self) -> eyre::Result<Vec<String>> {
        self.store.winners(self.parameters.size).await
    }

    fn standing_badges(
        &self,
        rank: Option<u64>,
        bid_count: u64,
        stats: &AggregateStats,
    ) -> BTreeSet<Badge> {
        badge::dynamic_badges(&Standing::new(
            rank,
            bid_count,
            self.parameters.size,
            stats.unique_bidders,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBidStore;

    const START: i64 = 1_000;
    const END: i64 = 2_000;

    fn ts(seconds: i64) -> Timestamp {
        Timestamp::from_second(seconds).unwrap()
    }

    fn parameters() -> AuctionParameters {
        AuctionParameters {
            start_time: ts(START),
            end_time: ts(END),
            entry_amount: 100,
            size: 4,
        }
    }

    fn service() -> AuctionService {
        AuctionService::new(
            Arc::new(InMemoryBidStore::new()),
            parameters(),
            30,
            Metrics::noop(),
        )
    }

    #[test]
    fn phases_follow_the_window() {
        let parameters = parameters();
        assert_eq!(Phase::NotStarted, parameters.phase_at(ts(START - 1)));
        assert_eq!(Phase::Open, parameters.phase_at(ts(START)));
        assert_eq!(Phase::Open, parameters.phase_at(ts(END - 1)));
        assert_eq!(Phase::Ended, parameters.phase_at(ts(END)));
    }

    #[test]
    fn boost_applies_to_the_whole_amount() {
        assert_eq!(Some(100), effective_amount(100, BoostStatus::None));
        assert_eq!(Some(105), effective_amount(100, BoostStatus::AllowListed));
        assert_eq!(Some(20), effective_amount(19, BoostStatus::AllowListed));
        assert_eq!(None, effective_amount(u64::MAX, BoostStatus::AllowListed));
    }

    #[tokio::test]
    async fn bids_outside_the_window_are_rejected() {
        let service = service();
        let err = service
            .bid_at(ts(START - 1), "alice", 500, "")
            .await
            .unwrap_err();
        assert!(matches!(err, BidError::NotStarted { .. }), "{err:?}");

        let err = service.bid_at(ts(END), "alice", 500, "").await.unwrap_err();
        assert!(matches!(err, BidError::Ended { .. }), "{err:?}");

        assert_eq!(None, service.bidder_view("alice").await.unwrap());
        assert_eq!(AggregateStats::default(), service.stats().await.unwrap());
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let service = service();
        let err = service
            .bid_at(ts(START), "alice", 0, "")
            .await
            .unwrap_err();
        assert!(matches!(err, BidError::NonPositiveAmount), "{err:?}");
    }

    #[tokio::test]
    async fn bids_must_strictly_increase() {
        let service = service();
        service
            .bid_at(ts(START), "alice", 600, "first")
            .await
            .unwrap();
        let before = service.bidder_view("alice").await.unwrap().unwrap();

        for amount in [600, 599, 1] {
            let err = service
                .bid_at(ts(START + 1), "alice", amount, "again")
                .await
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    BidError::NotHigher {
                        previous: 600,
                        ..
                    }
                ),
                "{err:?}"
            );
        }

        let after = service.bidder_view("alice").await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(1, service.stats().await.unwrap().total_bids);
    }

    #[tokio::test]
    async fn worked_auction_ranks_winners_and_clearing_price() {
        let service = service();
        let at = |offset| ts(START + offset);

        assert_eq!(
            RankDelta {
                old_rank: None,
                new_rank: 1
            },
            service.bid_at(at(1), "charl", 500, "").await.unwrap()
        );
        assert_eq!(
            RankDelta {
                old_rank: None,
                new_rank: 1
            },
            service.bid_at(at(2), "bob", 700, "").await.unwrap()
        );
        assert_eq!(
            RankDelta {
                old_rank: None,
                new_rank: 2
            },
            service.bid_at(at(3), "alice", 600, "").await.unwrap()
        );

        let board: Vec<_> = service
            .leaderboard(21)
            .await
            .unwrap()
            .into_iter()
            .map(|view| (view.bidder, view.rank, view.amount))
            .collect();
        assert_eq!(
            vec![
                ("bob".to_string(), Some(1), 700),
                ("alice".to_string(), Some(2), 600),
                ("charl".to_string(), Some(3), 500),
            ],
            board
        );
        assert_eq!(100, service.clearing_price().await.unwrap());

        service.bid_at(at(4), "dylan", 310, "").await.unwrap();
        service.bid_at(at(5), "eve", 320, "").await.unwrap();
        service.bid_at(at(6), "felix", 300, "").await.unwrap();
        assert_eq!(
            RankDelta {
                old_rank: Some(3),
                new_rank: 1
            },
            service.bid_at(at(7), "charl", 800, "").await.unwrap()
        );

        assert_eq!(
            vec!["charl", "bob", "alice", "eve"],
            service.winners().await.unwrap()
        );
        assert_eq!(310, service.clearing_price().await.unwrap());

        let stats = service.stats().await.unwrap();
        assert_eq!(7, stats.total_bids);
        assert_eq!(6, stats.unique_bidders);
    }

    #[tokio::test]
    async fn allow_listed_bidders_are_boosted_and_start_unranked() {
        let service = service();
        assert_eq!(
            1,
            service
                .seed_allow_list(&["gina".to_string()])
                .await
                .unwrap()
        );
        let seeded = service.bidder_view("gina").await.unwrap().unwrap();
        assert_eq!(None, seeded.rank);
        assert_eq!(0, seeded.amount);

        let delta = service.bid_at(ts(START), "gina", 200, "").await.unwrap();
        assert_eq!(None, delta.old_rank);
        assert_eq!(
            210,
            service.bidder_view("gina").await.unwrap().unwrap().amount
        );

        // the boost is applied to the full new amount, so 205 raw is 215 effective
        service.bid_at(ts(START + 1), "gina", 205, "").await.unwrap();
        assert_eq!(
            215,
            service.bidder_view("gina").await.unwrap().unwrap().amount
        );
        assert_eq!(1, service.stats().await.unwrap().unique_bidders);
    }

    #[tokio::test]
    async fn notes_are_truncated_and_sticky() {
        let service = service();
        service
            .bid_at(ts(START), "hana", 100, "a note that is much longer than thirty chars")
            .await
            .unwrap();
        let view = service.bidder_view("hana").await.unwrap().unwrap();
        assert_eq!("a note that is much longer tha", view.note);

        service.bid_at(ts(START + 1), "hana", 200, "").await.unwrap();
        let view = service.bidder_view("hana").await.unwrap().unwrap();
        assert_eq!("a note that is much longer tha", view.note);
        assert_eq!(2, view.bid_count);
    }

    #[tokio::test]
    async fn persisted_badges_never_shrink() {
        let service = service();
        service.bid_at(ts(START), "ivan", 5_000, "").await.unwrap();
        let first = service.bidder_view("ivan").await.unwrap().unwrap().badges;
        assert!(first.contains(&Badge::TookFirst), "{first:?}");
        assert!(first.contains(&Badge::Jump1k), "{first:?}");
        assert!(first.contains(&Badge::Early10), "{first:?}");

        service.bid_at(ts(START + 1), "jade", 9_000, "").await.unwrap();
        let second = service.bidder_view("ivan").await.unwrap().unwrap().badges;
        // ivan lost the lead but keeps what was earned; only standing badges change
        assert!(second.contains(&Badge::TookFirst), "{second:?}");
        assert!(!second.contains(&Badge::Top1), "{second:?}");
        assert!(first.contains(&Badge::Top1), "{first:?}");
    }

    #[tokio::test]
    async fn concurrent_bids_from_one_bidder_stay_monotonic() {
        let service = Arc::new(service());
        let handles: Vec<_> = (1..=20u64)
            .map(|amount| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .bid_at(ts(START), "kim", amount * 100, "")
                        .await
                })
            })
            .collect();
        let mut accepted = 0u64;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        let view = service.bidder_view("kim").await.unwrap().unwrap();
        assert_eq!(2_000, view.amount);
        assert_eq!(accepted, view.bid_count);
        assert_eq!(accepted, service.stats().await.unwrap().total_bids);
        assert_eq!(1, service.stats().await.unwrap().unique_bidders);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_bidders_keep_stats_and_ranks_consistent() {
        const BIDDERS: u64 = 16;
        const BIDS_PER_BIDDER: u64 = 5;

        let service = Arc::new(service());
        let handles: Vec<_> = (0..BIDDERS)
            .flat_map(|bidder| (1..=BIDS_PER_BIDDER).map(move |step| (bidder, step)))
            .map(|(bidder, step)| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .bid_at(
                            ts(START),
                            &format!("bidder-{bidder:02}"),
                            (bidder + 1) * 1_000 + step * 10,
                            "",
                        )
                        .await
                })
            })
            .collect();
        let mut accepted = 0u64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert!(matches!(err, BidError::NotHigher { .. }), "{err:?}"),
            }
        }

        let stats = service.stats().await.unwrap();
        assert_eq!(accepted, stats.total_bids);
        assert_eq!(BIDDERS, stats.unique_bidders);

        let leaderboard = service.leaderboard(100).await.unwrap();
        assert_eq!(BIDDERS as usize, leaderboard.len());
        let ranks: Vec<_> = leaderboard.iter().map(|view| view.rank).collect();
        let expected: Vec<_> = (1..=BIDDERS).map(Some).collect();
        assert_eq!(expected, ranks);
        assert!(leaderboard
            .windows(2)
            .all(|pair| pair[0].amount >= pair[1].amount));
        // the highest bid of every bidder always lands, whatever order the bids raced in
        for view in &leaderboard {
            let bidder: u64 = view.bidder["bidder-".len()..].parse().unwrap();
            assert_eq!((bidder + 1) * 1_000 + BIDS_PER_BIDDER * 10, view.amount);
        }
        assert_eq!(
            accepted,
            leaderboard.iter().map(|view| view.bid_count).sum::<u64>()
        );
    }
}
