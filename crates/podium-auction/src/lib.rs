//! Podium runs a sealed-ascending auction for a fixed number of slots.
//!
//! Bidders raise their own bid over the course of the auction window; only the
//! latest (and highest) bid of every bidder counts. When the window closes, the
//! top `size` bidders form the winning list and all of them pay the same
//! clearing price: the bid of the first bidder that did not make it into the
//! list, or the entry amount if there are not enough bidders to fill it.
//!
//! # Submitting bids
//!
//! Bids are submitted over JSON-RPC as proofs of an on-chain commitment,
//! signed by the bidder. The [`controller`] verifies the signature, asks an
//! on-chain verifier for the committed amount and guarantees that every proof
//! is only ever processed once. The accepted amount is then handed to the
//! [`AuctionService`], which enforces the auction window and the rule that a
//! bidder's effective amount strictly increases with every bid.
//!
//! # Badges
//!
//! Bidders collect badges along the way. Some are earned by a single bid and
//! kept forever (see [`badge::static_badges`]); others describe the bidder's
//! current standing and are recomputed on every read (see
//! [`badge::dynamic_badges`]).

use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    task::Poll,
};

pub mod auction;
pub mod badge;
pub mod config;
pub mod controller;
mod jsonrpc_server;
pub(crate) mod metrics;
pub mod ranking;
pub mod store;

pub use auction::AuctionService;
pub use config::Config;
use controller::{
    dedupe::InMemoryDedupeStore,
    verifier::{
        Ed25519SignatureVerifier,
        JsonRpcCommitmentVerifier,
    },
    Controller,
};
use eyre::WrapErr as _;
pub use metrics::Metrics;
use store::InMemoryBidStore;
use tokio::task::{
    JoinError,
    JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    info,
    instrument,
};

/// The [`Podium`] service returned by [`Podium::spawn`].
pub struct Podium {
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<eyre::Result<()>>>,
    local_addr: SocketAddr,
}

impl Podium {
    /// Spawns the [`Podium`] service.
    ///
    /// # Errors
    /// Returns an error if the config is inconsistent, the allow list could not be
    /// seeded, or the JSON-RPC server could not be started.
    pub async fn spawn(cfg: Config, metrics: &'static Metrics) -> eyre::Result<Self> {
        let parameters = cfg.parameters();
        eyre::ensure!(
            parameters.start_time < parameters.end_time,
            "auction must start before it ends; start: `{}`, end: `{}`",
            parameters.start_time,
            parameters.end_time,
        );
        eyre::ensure!(parameters.size > 0, "auction size must be positive");
        eyre::ensure!(cfg.leaderboard_limit > 0, "leaderboard limit must be positive");

        let auction = AuctionService::new(
            Arc::new(InMemoryBidStore::new()),
            parameters,
            cfg.note_max_chars,
            metrics,
        );
        let seeded = auction
            .seed_allow_list(&cfg.allow_list())
            .await
            .wrap_err("failed seeding allow list")?;
        info!(seeded, "seeded allow-listed bidders");

        let commitments = JsonRpcCommitmentVerifier::new(&cfg.commitment_verifier_url)
            .wrap_err("failed constructing on-chain verifier client")?;
        let controller = Controller::new(
            Arc::new(auction),
            Arc::new(Ed25519SignatureVerifier),
            Arc::new(commitments),
            Arc::new(InMemoryDedupeStore::new()),
            cfg.leaderboard_limit,
            metrics,
        );

        let shutdown_token = CancellationToken::new();
        let (local_addr, task) = jsonrpc_server::Builder {
            cancellation_token: shutdown_token.child_token(),
            endpoint: cfg.jsonrpc_listen_addr,
            controller: Arc::new(controller),
        }
        .start()
        .await
        .wrap_err("failed starting jsonrpc server")?;

        Ok(Self {
            shutdown_token,
            task: Some(task),
            local_addr,
        })
    }

    /// The address the JSON-RPC server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shuts down Podium, waiting for the JSON-RPC server to stop.
    ///
    /// # Errors
    /// Returns an error if an error occured during shutdown.
    ///
    /// # Panics
    /// Panics if called twice.
    #[instrument(skip_all, err)]
    pub async fn shutdown(&mut self) -> eyre::Result<()> {
        self.shutdown_token.cancel();
        flatten_join_result(
            self.task
                .take()
                .expect("shutdown must not be called twice")
                .await,
        )
    }
}

impl Future for Podium {
    type Output = eyre::Result<()>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .task
            .as_mut()
            .expect("podium must not be polled after shutdown");
        task.poll_unpin(cx).map(flatten_join_result)
    }
}

fn flatten_join_result<T>(res: Result<eyre::Result<T>, JoinError>) -> eyre::Result<T> {
    match res {
        Ok(Ok(val)) => Ok(val),
        Ok(Err(err)) => Err(err).wrap_err("task returned with error"),
        Err(err) => Err(err).wrap_err("task panicked"),
    }
}
