//! The request-dispatch surface in front of the [`AuctionService`].
//!
//! Bids never arrive as plain amounts. A caller submits a proof of an on-chain
//! commitment together with a signature over it; the controller checks that the
//! signature belongs to the bidder, asks the on-chain verifier what amount the proof
//! commits to and only then hands the amount to the auction.
//!
//! Every proof is processed at most once. Its digest is recorded before the bid is
//! placed and any later submission of the same proof is answered with
//! `"already processed"` without touching the bid store.

use std::sync::Arc;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tracing::{
    error,
    info,
    instrument,
    Level,
    Span,
};

use crate::{
    auction::{
        AuctionParameters,
        AuctionService,
        BidError,
        BidderView,
        RankDelta,
    },
    store::AggregateStats,
    Metrics,
};

pub mod dedupe;
pub mod verifier;

use dedupe::{
    DedupeStore,
    ProofDigest,
};
use verifier::{
    CommitmentVerifier,
    SignatureError,
    SignatureVerifier,
    VerificationError,
};

pub const QUERY_BIDDER: &str = "queryBidder";
pub const QUERY_AUCTION_PARAMETERS: &str = "queryAuctionParameters";
pub const SUBMIT_PROOF_OF_BID: &str = "submitProofOfBid";
pub const LOAD_PAGE_SNAPSHOT: &str = "loadPageSnapshot";
pub const QUERY_STATS: &str = "queryStats";

/// All methods understood by [`Controller::dispatch`].
pub const METHODS: [&str; 5] = [
    QUERY_BIDDER,
    QUERY_AUCTION_PARAMETERS,
    SUBMIT_PROOF_OF_BID,
    LOAD_PAGE_SNAPSHOT,
    QUERY_STATS,
];

#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("signature verification failed")]
    Signature(#[source] SignatureError),
    #[error("on-chain verification failed")]
    Commitment(#[source] VerificationError),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("unauthorized: {0}")]
    Unauthorized(#[source] AuthorizationError),
    #[error(transparent)]
    Rejected(BidError),
    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ControllerError {
    fn internal(report: eyre::Report) -> Self {
        Self::Internal(report.into())
    }

    /// The HTTP status code that describes this error to callers.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::UnknownMethod(_) => StatusCode::NOT_FOUND,
            Self::InvalidParams(_) | Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BidError> for ControllerError {
    fn from(value: BidError) -> Self {
        match value {
            BidError::Storage(source) => Self::Internal(source),
            rejection => Self::Rejected(rejection),
        }
    }
}

/// The result of submitting a proof of bid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmitOutcome {
    Accepted(RankDelta),
    Replayed { status: ReplayStatus },
}

impl SubmitOutcome {
    const fn already_processed() -> Self {
        Self::Replayed {
            status: ReplayStatus::AlreadyProcessed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    #[serde(rename = "already processed")]
    AlreadyProcessed,
}

/// Everything a page rendering the auction needs in one response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub leaderboard: Vec<BidderView>,
    pub parameters: AuctionParameters,
    pub bidder: Option<BidderView>,
    pub stats: AggregateStats,
    pub clearing_price: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total_bids: u64,
    pub unique_bidders: u64,
    pub clearing_price: u64,
    pub winners: Vec<String>,
}

pub struct Controller {
    auction: Arc<AuctionService>,
    signatures: Arc<dyn SignatureVerifier>,
    commitments: Arc<dyn CommitmentVerifier>,
    dedupe: Arc<dyn DedupeStore>,
    leaderboard_limit: usize,
    metrics: &'static Metrics,
}

impl Controller {
    #[must_use]
    pub fn new(
        auction: Arc<AuctionService>,
        signatures: Arc<dyn SignatureVerifier>,
        commitments: Arc<dyn CommitmentVerifier>,
        dedupe: Arc<dyn DedupeStore>,
        leaderboard_limit: usize,
        metrics: &'static Metrics,
    ) -> Self {
        Self {
            auction,
            signatures,
            commitments,
            dedupe,
            leaderboard_limit,
            metrics,
        }
    }

    /// Routes `method` with positional `params` to the matching operation.
    ///
    /// # Errors
    /// Returns an error if the method is unknown, its parameters are malformed, or the
    /// operation itself failed.
    pub async fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value, ControllerError> {
        match method {
            QUERY_BIDDER => {
                let bidder = required_str(params, 0, "bidderId")?;
                to_value(&self.query_bidder(bidder).await?)
            }
            QUERY_AUCTION_PARAMETERS => to_value(&self.query_auction_parameters()),
            SUBMIT_PROOF_OF_BID => {
                let bidder = required_str(params, 0, "bidderId")?;
                let proof = hex_param(params, 1, "proof")?;
                let signature = hex_param(params, 2, "signature")?;
                let note = optional_str(params, 3, "note")?.unwrap_or_default();
                to_value(
                    &self
                        .submit_proof_of_bid(bidder, &proof, &signature, note)
                        .await?,
                )
            }
            LOAD_PAGE_SNAPSHOT => {
                let bidder = optional_str(params, 0, "bidderId")?;
                to_value(&self.load_page_snapshot(bidder).await?)
            }
            QUERY_STATS => to_value(&self.query_stats().await?),
            other => Err(ControllerError::UnknownMethod(other.to_string())),
        }
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn query_bidder(&self, bidder: &str) -> Result<Option<BidderView>, ControllerError> {
        self.auction
            .bidder_view(&normalize_bidder(bidder))
            .await
            .map_err(|err| self.storage_failure(err))
    }

    #[must_use]
    pub fn query_auction_parameters(&self) -> AuctionParameters {
        *self.auction.parameters()
    }

    /// Verifies `proof` and places the amount it commits to as a bid of `bidder`.
    ///
    /// # Errors
    /// Returns an error if `signature` is not `bidder`'s signature over `proof`, if the
    /// on-chain verifier does not vouch for `proof` or attributes it to someone other than
    /// `bidder`, or if the auction refused the bid.
    #[instrument(
        skip_all,
        fields(bidder = %bidder, proof_digest = tracing::field::Empty),
        err(level = Level::INFO)
    )]
    pub async fn submit_proof_of_bid(
        &self,
        bidder: &str,
        proof: &[u8],
        signature: &[u8],
        note: &str,
    ) -> Result<SubmitOutcome, ControllerError> {
        let bidder = normalize_bidder(bidder);
        if let Err(source) = self.signatures.verify(&bidder, proof, signature) {
            self.metrics.increment_proof_verification_failures();
            return Err(ControllerError::Unauthorized(
                AuthorizationError::Signature(source),
            ));
        }

        let digest = ProofDigest::of(proof);
        Span::current().record("proof_digest", digest.as_str());
        if self
            .dedupe
            .is_processed(&digest)
            .await
            .map_err(|err| self.storage_failure(err))?
        {
            return Ok(self.replayed());
        }

        // a proof only counts for the bidder that made the commitment behind it
        let amount = match self
            .commitments
            .verify_commitment(proof)
            .await
            .and_then(|commitment| commitment.amount_committed_by(&bidder))
        {
            Ok(amount) => amount,
            Err(source) => {
                self.metrics.increment_proof_verification_failures();
                return Err(ControllerError::Unauthorized(
                    AuthorizationError::Commitment(source),
                ));
            }
        };

        // a racing submission of the same proof may have won since the first check
        if !self
            .dedupe
            .mark_processed(&digest)
            .await
            .map_err(|err| self.storage_failure(err))?
        {
            return Ok(self.replayed());
        }

        let delta = self
            .auction
            .bid(&bidder, amount, note)
            .await
            .map_err(|err| match ControllerError::from(err) {
                ControllerError::Internal(source) => {
                    error!(error = %source, "bid store failed while placing a bid");
                    ControllerError::Internal(source)
                }
                other => other,
            })?;
        Ok(SubmitOutcome::Accepted(delta))
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn load_page_snapshot(
        &self,
        bidder: Option<&str>,
    ) -> Result<PageSnapshot, ControllerError> {
        let leaderboard = self
            .auction
            .leaderboard(self.leaderboard_limit)
            .await
            .map_err(|err| self.storage_failure(err))?;
        let bidder = match bidder {
            Some(bidder) => self.query_bidder(bidder).await?,
            None => None,
        };
        let stats = self
            .auction
            .stats()
            .await
            .map_err(|err| self.storage_failure(err))?;
        let clearing_price = self
            .auction
            .clearing_price()
            .await
            .map_err(|err| self.storage_failure(err))?;
        Ok(PageSnapshot {
            leaderboard,
            parameters: self.query_auction_parameters(),
            bidder,
            stats,
            clearing_price,
        })
    }

    /// # Errors
    /// Returns an error if the store failed.
    pub async fn query_stats(&self) -> Result<StatsView, ControllerError> {
        let AggregateStats {
            total_bids,
            unique_bidders,
        } = self
            .auction
            .stats()
            .await
            .map_err(|err| self.storage_failure(err))?;
        let clearing_price = self
            .auction
            .clearing_price()
            .await
            .map_err(|err| self.storage_failure(err))?;
        let winners = self
            .auction
            .winners()
            .await
            .map_err(|err| self.storage_failure(err))?;
        Ok(StatsView {
            total_bids,
            unique_bidders,
            clearing_price,
            winners,
        })
    }

    fn replayed(&self) -> SubmitOutcome {
        self.metrics.increment_proofs_replayed();
        info!("proof was already processed; skipping");
        SubmitOutcome::already_processed()
    }

    fn storage_failure(&self, report: eyre::Report) -> ControllerError {
        error!(error = %report, "storage access failed");
        ControllerError::internal(report)
    }
}

/// Bidder ids are hex encoded keys; they are stored in lower case so that the same key
/// always maps to the same row.
fn normalize_bidder(bidder: &str) -> String {
    bidder.to_ascii_lowercase()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ControllerError> {
    serde_json::to_value(value).map_err(|err| ControllerError::Internal(err.into()))
}

fn optional_str<'a>(
    params: &'a [Value],
    index: usize,
    name: &str,
) -> Result<Option<&'a str>, ControllerError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(ControllerError::InvalidParams(format!(
            "`{name}` at position {index} must be a string"
        ))),
    }
}

fn required_str<'a>(
    params: &'a [Value],
    index: usize,
    name: &str,
) -> Result<&'a str, ControllerError> {
    match optional_str(params, index, name)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ControllerError::InvalidParams(format!(
            "`{name}` at position {index} is required"
        ))),
    }
}

fn hex_param(params: &[Value], index: usize, name: &str) -> Result<Vec<u8>, ControllerError> {
    let value = required_str(params, index, name)?;
    hex::decode(value.strip_prefix("0x").unwrap_or(value)).map_err(|err| {
        ControllerError::InvalidParams(format!("`{name}` is not hex encoded: {err}"))
    })
}
