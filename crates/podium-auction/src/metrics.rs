use std::time::Duration;

use metrics::{
    counter,
    describe_counter,
    describe_gauge,
    describe_histogram,
    gauge,
    histogram,
    Counter,
    Gauge,
    Histogram,
    Unit,
};
use telemetry::metric_names;

pub struct Metrics {
    bids_accepted: Counter,
    bids_rejected: Counter,
    bid_processing_latency: Histogram,
    unique_bidders: Gauge,
    proofs_replayed: Counter,
    proof_verification_failures: Counter,
}

impl Metrics {
    pub(crate) fn increment_bids_accepted(&self) {
        self.bids_accepted.increment(1);
    }

    pub(crate) fn increment_bids_rejected(&self) {
        self.bids_rejected.increment(1);
    }

    pub(crate) fn record_bid_processing_latency(&self, latency: Duration) {
        self.bid_processing_latency.record(latency);
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "the bidder count is far below the precision limit of f64"
    )]
    pub(crate) fn set_unique_bidders(&self, unique_bidders: u64) {
        self.unique_bidders.set(unique_bidders as f64);
    }

    pub(crate) fn increment_proofs_replayed(&self) {
        self.proofs_replayed.increment(1);
    }

    pub(crate) fn increment_proof_verification_failures(&self) {
        self.proof_verification_failures.increment(1);
    }

    /// Metrics not bound to any recorder.
    #[cfg(test)]
    pub(crate) fn noop() -> &'static Self {
        use telemetry::Metrics as _;
        Box::leak(Box::new(Self::register(&())))
    }
}

impl telemetry::Metrics for Metrics {
    type Config = ();

    fn buckets(_config: &()) -> Vec<(&'static str, Vec<f64>)> {
        vec![(
            BID_PROCESSING_LATENCY,
            vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
        )]
    }

    fn register(_config: &()) -> Self {
        describe_counter!(
            BIDS_ACCEPTED,
            Unit::Count,
            "The number of bids accepted and written to the bid store"
        );
        let bids_accepted = counter!(BIDS_ACCEPTED);

        describe_counter!(
            BIDS_REJECTED,
            Unit::Count,
            "The number of bids rejected for violating the auction window or bid rules"
        );
        let bids_rejected = counter!(BIDS_REJECTED);

        describe_histogram!(
            BID_PROCESSING_LATENCY,
            Unit::Seconds,
            "The time it takes to validate, store and rank a single bid, in seconds"
        );
        let bid_processing_latency = histogram!(BID_PROCESSING_LATENCY);

        describe_gauge!(
            UNIQUE_BIDDERS,
            Unit::Count,
            "The number of bidders that placed at least one bid"
        );
        let unique_bidders = gauge!(UNIQUE_BIDDERS);

        describe_counter!(
            PROOFS_REPLAYED,
            Unit::Count,
            "The number of submitted proofs that had already been processed"
        );
        let proofs_replayed = counter!(PROOFS_REPLAYED);

        describe_counter!(
            PROOF_VERIFICATION_FAILURES,
            Unit::Count,
            "The number of submitted proofs that failed signature or on-chain verification"
        );
        let proof_verification_failures = counter!(PROOF_VERIFICATION_FAILURES);

        Self {
            bids_accepted,
            bids_rejected,
            bid_processing_latency,
            unique_bidders,
            proofs_replayed,
            proof_verification_failures,
        }
    }
}

metric_names!(pub const
    BIDS_ACCEPTED,
    BIDS_REJECTED,
    BID_PROCESSING_LATENCY,
    UNIQUE_BIDDERS,
    PROOFS_REPLAYED,
    PROOF_VERIFICATION_FAILURES,
);
