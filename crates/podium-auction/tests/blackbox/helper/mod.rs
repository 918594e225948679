use std::net::SocketAddr;

use ed25519_consensus::SigningKey;
use jiff::{
    SignedDuration,
    Timestamp,
};
use jsonrpsee::{
    core::client::ClientT as _,
    http_client::{
        HttpClient,
        HttpClientBuilder,
    },
    rpc_params,
    server::{
        Server,
        ServerHandle,
    },
    types::{
        ErrorObject,
        ErrorObjectOwned,
    },
    RpcModule,
};
use once_cell::sync::Lazy;
use podium_auction::{
    controller::verifier::{
        Commitment,
        VERIFY_COMMITMENT,
    },
    Config,
    Metrics,
    Podium,
};
use serde_json::Value;

/// The proof the mock on-chain verifier reports as not finalized.
pub const UNFINALIZED_PROOF: &[u8] = b"unfinalized";

static TELEMETRY: Lazy<&'static Metrics> = Lazy::new(|| {
    if std::env::var_os("TEST_LOG").is_some() {
        let filter_directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
        telemetry::configure()
            .set_force_stdout(true)
            .set_pretty_print(true)
            .set_filter_directives(&filter_directives)
            .try_init::<Metrics>(&())
            .unwrap()
    } else {
        telemetry::configure()
            .set_stdout_writer(std::io::sink)
            .try_init::<Metrics>(&())
            .unwrap()
    }
});

/// A running podium service together with the mock on-chain verifier it talks to.
pub struct TestPodium {
    pub podium: Podium,
    pub client: HttpClient,
    verifier: ServerHandle,
}

impl TestPodium {
    pub async fn shutdown(mut self) {
        self.podium.shutdown().await.unwrap();
        let _ = self.verifier.stop();
    }

    pub async fn request(&self, method: &str, params: jsonrpsee::core::params::ArrayParams) -> Value {
        self.client.request(method, params).await.unwrap()
    }

    /// Sends a request that must fail, returning the JSON-RPC error code.
    pub async fn request_err(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> i32 {
        match self
            .client
            .request::<Value, _>(method, params)
            .await
            .unwrap_err()
        {
            jsonrpsee::core::client::Error::Call(object) => object.code(),
            other => panic!("expected a call error, got: {other:?}"),
        }
    }

    /// Submits `proof` as a bid of `bidder`, signed with the bidder's key.
    pub async fn submit(&self, bidder: &Bidder, proof: &[u8], note: &str) -> Value {
        self.request(
            "submitProofOfBid",
            rpc_params![bidder.id(), hex::encode(proof), bidder.sign(proof), note],
        )
        .await
    }
}

pub struct Bidder {
    key: SigningKey,
}

impl Bidder {
    pub fn random() -> Self {
        Self {
            key: SigningKey::new(rand::thread_rng()),
        }
    }

    pub fn id(&self) -> String {
        hex::encode(self.key.verification_key().to_bytes())
    }

    pub fn sign(&self, proof: &[u8]) -> String {
        hex::encode(self.key.sign(proof).to_bytes())
    }
}

/// A proof the mock verifier reports as a commitment of `amount` made by `committer`.
/// `nonce` keeps proofs of equal amounts distinct.
pub fn proof(committer: &Bidder, amount: u64, nonce: &str) -> Vec<u8> {
    format!("{amount}:{}:{nonce}", committer.id()).into_bytes()
}

pub fn config(start_time: Timestamp, end_time: Timestamp, verifier: SocketAddr) -> Config {
    Config {
        log: "info".into(),
        force_stdout: false,
        pretty_print: false,
        no_metrics: true,
        metrics_http_listener_addr: String::new(),
        jsonrpc_listen_addr: "127.0.0.1:0".into(),
        start_time,
        end_time,
        entry_amount: 100,
        auction_size: 3,
        note_max_chars: 30,
        leaderboard_limit: 21,
        allow_list: String::new(),
        commitment_verifier_url: format!("http://{verifier}"),
    }
}

/// Spawns podium with an auction window that is currently open.
pub async fn spawn_open_podium() -> TestPodium {
    let now = Timestamp::now();
    spawn_podium(|verifier| {
        config(
            now.checked_sub(SignedDuration::from_hours(1)).unwrap(),
            now.checked_add(SignedDuration::from_hours(1)).unwrap(),
            verifier,
        )
    })
    .await
}

pub async fn spawn_podium(make_config: impl FnOnce(SocketAddr) -> Config) -> TestPodium {
    let metrics = *Lazy::force(&TELEMETRY);
    let (verifier_addr, verifier) = spawn_mock_verifier().await;
    let podium = Podium::spawn(make_config(verifier_addr), metrics)
        .await
        .unwrap();
    let client = HttpClientBuilder::default()
        .build(format!("http://{}", podium.local_addr()))
        .unwrap();
    TestPodium {
        podium,
        client,
        verifier,
    }
}

/// Answers `verifyCommitment` by reading the amount and the committer out of proofs
/// created by [`proof`].
async fn spawn_mock_verifier() -> (SocketAddr, ServerHandle) {
    let server = Server::builder().build("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let mut module = RpcModule::new(());
    module
        .register_method(VERIFY_COMMITMENT, |params, _, _| {
            let proof_hex: String = params.one()?;
            let proof = hex::decode(proof_hex).map_err(invalid_proof)?;
            if proof == UNFINALIZED_PROOF {
                return Ok::<_, ErrorObjectOwned>(Commitment {
                    finalized: false,
                    committer: String::new(),
                    amount: 0,
                });
            }
            let proof = String::from_utf8(proof).map_err(invalid_proof)?;
            let mut parts = proof.split(':');
            let amount = parts
                .next()
                .and_then(|amount| amount.parse().ok())
                .ok_or_else(|| invalid_proof("proof carries no amount"))?;
            let committer = parts
                .next()
                .ok_or_else(|| invalid_proof("proof carries no committer"))?
                .to_string();
            Ok(Commitment {
                finalized: true,
                committer,
                amount,
            })
        })
        .unwrap();
    (addr, server.start(module))
}

fn invalid_proof(err: impl ToString) -> ErrorObjectOwned {
    ErrorObject::owned::<()>(-32000, err.to_string(), None)
}
