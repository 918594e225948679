//! Replay protection for submitted proofs.

use std::fmt;

use async_trait::async_trait;
use papaya::{
    Compute,
    Operation,
};
use sha2::{
    Digest as _,
    Sha256,
};

/// The hex encoded SHA-256 digest of a submitted proof.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProofDigest(String);

impl ProofDigest {
    #[must_use]
    pub fn of(proof: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(proof)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProofDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A presence-only set of processed proof digests.
///
/// Keys are written at most once: the first writer wins and every later writer
/// observes the key as already processed.
#[async_trait]
pub trait DedupeStore: Send + Sync + 'static {
    async fn is_processed(&self, digest: &ProofDigest) -> eyre::Result<bool>;

    /// Marks `digest` as processed, returning `false` if it already was.
    async fn mark_processed(&self, digest: &ProofDigest) -> eyre::Result<bool>;
}

#[derive(Default)]
pub struct InMemoryDedupeStore {
    processed: papaya::HashMap<ProofDigest, ()>,
}

impl InMemoryDedupeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupeStore for InMemoryDedupeStore {
    async fn is_processed(&self, digest: &ProofDigest) -> eyre::Result<bool> {
        Ok(self.processed.pin().contains_key(digest))
    }

    async fn mark_processed(&self, digest: &ProofDigest) -> eyre::Result<bool> {
        match self
            .processed
            .pin()
            .compute(digest.clone(), |entry| match entry {
                Some(_) => Operation::Abort(()),
                None => Operation::Insert(()),
            }) {
            Compute::Inserted(..) => Ok(true),
            Compute::Aborted(()) => Ok(false),
            Compute::Updated {
                ..
            }
            | Compute::Removed(..) => {
                unreachable!("marking a digest never updates or removes an entry")
            }
        }
    }
}
