use figment::{
    providers::Env as FigmentEnv,
    Figment,
};
use itertools::Itertools as _;
use jiff::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};

use crate::auction::AuctionParameters;

/// Reads the [`Config`] from the environment.
///
/// `RUST_LOG` is honored, but a `PODIUM_AUCTION_LOG` takes precedence over it.
///
/// # Errors
/// Returns an error if a field is missing or cannot be parsed.
pub fn get() -> Result<Config, figment::Error> {
    get_with_prefix(Config::PREFIX)
}

fn get_with_prefix(prefix: &str) -> Result<Config, figment::Error> {
    Figment::new()
        .merge(FigmentEnv::prefixed("RUST_").split("_").only(&["log"]))
        .merge(FigmentEnv::prefixed(prefix))
        .extract()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
/// The single config for creating a podium-auction service.
pub struct Config {
    /// Log level for the service.
    pub log: String,
    /// Forces writing trace data to stdout no matter if connected to a tty or not.
    pub force_stdout: bool,
    /// Writes human readable logs instead of json. Only takes effect when writing to a tty
    /// or if `force_stdout` is set.
    pub pretty_print: bool,
    /// Set to true to disable the metrics server
    pub no_metrics: bool,
    /// The endpoint which will be listened on for serving prometheus metrics
    pub metrics_http_listener_addr: String,
    /// The address the JSON-RPC server binds to.
    pub jsonrpc_listen_addr: String,
    /// The moment the auction opens for bids, as an RFC 3339 timestamp.
    pub start_time: Timestamp,
    /// The moment the auction closes. Bids at exactly this moment are rejected.
    pub end_time: Timestamp,
    /// The minimum bid and the clearing price of an undersubscribed auction.
    pub entry_amount: u64,
    /// The number of slots in the winning list.
    pub auction_size: u64,
    /// Notes longer than this many characters are cut.
    pub note_max_chars: usize,
    /// The number of bidders returned in a page snapshot.
    pub leaderboard_limit: usize,
    /// A comma separated list of bidder ids whose bids are boosted. Can be empty.
    pub allow_list: String,
    /// The JSON-RPC endpoint of the on-chain verifier.
    pub commitment_verifier_url: String,
}

impl Config {
    pub const PREFIX: &'static str = "PODIUM_AUCTION_";

    /// The allow-listed bidders in lower case, with surrounding whitespace, empty entries
    /// and duplicates removed.
    #[must_use]
    pub fn allow_list(&self) -> Vec<String> {
        self.allow_list
            .split(',')
            .map(str::trim)
            .filter(|bidder| !bidder.is_empty())
            .map(str::to_ascii_lowercase)
            .unique()
            .collect()
    }

    #[must_use]
    pub fn parameters(&self) -> AuctionParameters {
        AuctionParameters {
            start_time: self.start_time,
            end_time: self.end_time,
            entry_amount: self.entry_amount,
            size: self.auction_size,
        }
    }
}
