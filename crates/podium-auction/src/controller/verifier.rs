//! The external collaborators that vouch for a submitted proof.

use std::time::Duration;

use async_trait::async_trait;
use ed25519_consensus::{
    Signature,
    VerificationKey,
};
use eyre::WrapErr as _;
use jsonrpsee::{
    core::client::ClientT as _,
    http_client::{
        HttpClient,
        HttpClientBuilder,
    },
    rpc_params,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    instrument,
    warn,
};

/// The JSON-RPC method called on the on-chain verifier.
pub const VERIFY_COMMITMENT: &str = "verifyCommitment";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("bidder is not a hex encoded ed25519 verification key")]
    MalformedBidder,
    #[error("signature is not 64 bytes long")]
    MalformedSignature,
    #[error("signature does not match the bidder's key")]
    Mismatch(#[source] ed25519_consensus::Error),
}

/// Checks that `signature` over `proof` was produced by `bidder`.
pub trait SignatureVerifier: Send + Sync + 'static {
    /// # Errors
    /// Returns an error if the signature does not resolve to `bidder`.
    fn verify(&self, bidder: &str, proof: &[u8], signature: &[u8]) -> Result<(), SignatureError>;
}

/// Bidders are identified by their hex encoded ed25519 verification key.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519SignatureVerifier;

impl SignatureVerifier for Ed25519SignatureVerifier {
    fn verify(&self, bidder: &str, proof: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let key_bytes: [u8; 32] = hex::decode(bidder)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(SignatureError::MalformedBidder)?;
        let key =
            VerificationKey::try_from(key_bytes).map_err(|_| SignatureError::MalformedBidder)?;
        let signature_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| SignatureError::MalformedSignature)?;
        key.verify(&Signature::from(signature_bytes), proof)
            .map_err(SignatureError::Mismatch)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("the commitment is not finalized")]
    NotFinalized,
    #[error("the commitment was made by `{committer}`, not by the submitting bidder")]
    ForeignCommitment { committer: String },
    #[error("request to the on-chain verifier failed")]
    Request(#[source] jsonrpsee::core::client::Error),
}

/// Looks up the on-chain commitment a proof refers to.
#[async_trait]
pub trait CommitmentVerifier: Send + Sync + 'static {
    /// Returns the commitment backing `proof`, finalized or not.
    ///
    /// # Errors
    /// Returns an error if the verifier could not be asked.
    async fn verify_commitment(&self, proof: &[u8]) -> Result<Commitment, VerificationError>;
}

/// The response of the on-chain verifier's `verifyCommitment` method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub finalized: bool,
    /// The bidder id (hex encoded verification key) of the account that made the
    /// commitment.
    pub committer: String,
    pub amount: u64,
}

impl Commitment {
    /// Returns the committed amount if the commitment is finalized and was made by
    /// `bidder`.
    ///
    /// # Errors
    /// Returns an error if the commitment is not finalized or belongs to someone else.
    pub fn amount_committed_by(&self, bidder: &str) -> Result<u64, VerificationError> {
        if !self.finalized {
            return Err(VerificationError::NotFinalized);
        }
        if !self.committer.eq_ignore_ascii_case(bidder) {
            return Err(VerificationError::ForeignCommitment {
                committer: self.committer.clone(),
            });
        }
        Ok(self.amount)
    }
}

/// Asks an on-chain verifier over JSON-RPC.
pub struct JsonRpcCommitmentVerifier {
    client: HttpClient,
}

impl JsonRpcCommitmentVerifier {
    /// # Errors
    /// Returns an error if no client could be constructed for `url`.
    pub fn new(url: &str) -> eyre::Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(5))
            .build(url)
            .wrap_err_with(|| format!("failed constructing json rpc client for `{url}`"))?;
        Ok(Self {
            client,
        })
    }
}

#[async_trait]
impl CommitmentVerifier for JsonRpcCommitmentVerifier {
    #[instrument(skip_all, err)]
    async fn verify_commitment(&self, proof: &[u8]) -> Result<Commitment, VerificationError> {
        let proof = hex::encode(proof);
        let retry_config = tryhard::RetryFutureConfig::new(3)
            .exponential_backoff(Duration::from_millis(100))
            .max_delay(Duration::from_secs(1))
            .on_retry(
                |attempt: u32,
                 next_delay: Option<Duration>,
                 error: &jsonrpsee::core::client::Error| {
                    warn!(
                        attempt,
                        wait_duration = ?next_delay,
                        error = error as &dyn std::error::Error,
                        "failed calling on-chain verifier; retrying after backoff",
                    );
                    futures::future::ready(())
                },
            );
        tryhard::retry_fn(|| {
            self.client
                .request(VERIFY_COMMITMENT, rpc_params![proof.clone()])
        })
        .with_config(retry_config)
        .await
        .map_err(VerificationError::Request)
    }
}
