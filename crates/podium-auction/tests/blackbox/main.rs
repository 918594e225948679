pub mod helper;

use jiff::{
    SignedDuration,
    Timestamp,
};
use jsonrpsee::rpc_params;
use serde_json::json;

use crate::helper::{
    config,
    proof,
    spawn_open_podium,
    spawn_podium,
    Bidder,
    UNFINALIZED_PROOF,
};

#[tokio::test(flavor = "multi_thread")]
async fn submitted_proof_is_ranked_and_replay_is_idempotent() {
    let podium = spawn_open_podium().await;
    let alice = Bidder::random();
    let proof = proof(&alice, 500, "alice-1");

    let rsp = podium.submit(&alice, &proof, "gm").await;
    assert_eq!(json!({"oldRank": null, "newRank": 1}), rsp);

    let rsp = podium.submit(&alice, &proof, "gm").await;
    assert_eq!(json!({"status": "already processed"}), rsp);

    let stats = podium.request("queryStats", rpc_params![]).await;
    assert_eq!(json!(1), stats["totalBids"]);
    assert_eq!(json!(1), stats["uniqueBidders"]);
    assert_eq!(json!([alice.id()]), stats["winners"]);

    let view = podium
        .request("queryBidder", rpc_params![alice.id()])
        .await;
    assert_eq!(json!(500), view["amount"]);
    assert_eq!(json!("gm"), view["note"]);
    assert_eq!(json!(1), view["bidCount"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unverified_proofs_are_unauthorized() {
    let podium = spawn_open_podium().await;
    let alice = Bidder::random();
    let mallory = Bidder::random();

    let proof = proof(&alice, 500, "alice-1");
    let code = podium
        .request_err(
            "submitProofOfBid",
            rpc_params![alice.id(), hex::encode(&proof), mallory.sign(&proof), ""],
        )
        .await;
    assert_eq!(401, code);

    let code = podium
        .request_err(
            "submitProofOfBid",
            rpc_params![
                alice.id(),
                hex::encode(UNFINALIZED_PROOF),
                alice.sign(UNFINALIZED_PROOF),
                ""
            ],
        )
        .await;
    assert_eq!(401, code);

    let view = podium
        .request("queryBidder", rpc_params![alice.id()])
        .await;
    assert!(view.is_null(), "{view}");

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn proof_of_another_bidder_cannot_be_claimed() {
    let podium = spawn_open_podium().await;
    let alice = Bidder::random();
    let mallory = Bidder::random();
    let proof = proof(&alice, 500, "alice-1");

    // correctly signed by mallory, but the commitment behind it is alice's
    let code = podium
        .request_err(
            "submitProofOfBid",
            rpc_params![mallory.id(), hex::encode(&proof), mallory.sign(&proof), ""],
        )
        .await;
    assert_eq!(401, code);
    let view = podium
        .request("queryBidder", rpc_params![mallory.id()])
        .await;
    assert!(view.is_null(), "{view}");

    let rsp = podium.submit(&alice, &proof, "").await;
    assert_eq!(json!({"oldRank": null, "newRank": 1}), rsp);

    let stats = podium.request("queryStats", rpc_params![]).await;
    assert_eq!(json!(1), stats["totalBids"]);
    assert_eq!(json!([alice.id()]), stats["winners"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn upper_case_bidder_ids_map_to_the_same_bidder() {
    let podium = spawn_open_podium().await;
    let alice = Bidder::random();
    let upper = alice.id().to_ascii_uppercase();

    let first = proof(&alice, 500, "alice-1");
    let rsp = podium
        .request(
            "submitProofOfBid",
            rpc_params![upper.clone(), hex::encode(&first), alice.sign(&first), ""],
        )
        .await;
    assert_eq!(json!({"oldRank": null, "newRank": 1}), rsp);
    podium
        .submit(&alice, &proof(&alice, 600, "alice-2"), "")
        .await;

    let view = podium.request("queryBidder", rpc_params![upper]).await;
    assert_eq!(json!(alice.id()), view["bidder"]);
    assert_eq!(json!(600), view["amount"]);
    assert_eq!(json!(2), view["bidCount"]);

    let stats = podium.request("queryStats", rpc_params![]).await;
    assert_eq!(json!(1), stats["uniqueBidders"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bids_before_the_window_opens_are_bad_requests() {
    let start = Timestamp::now()
        .checked_add(SignedDuration::from_hours(1))
        .unwrap();
    let end = start.checked_add(SignedDuration::from_hours(1)).unwrap();
    let podium = spawn_podium(|verifier| config(start, end, verifier)).await;
    let alice = Bidder::random();

    let proof = proof(&alice, 500, "alice-1");
    let code = podium
        .request_err(
            "submitProofOfBid",
            rpc_params![alice.id(), hex::encode(&proof), alice.sign(&proof), ""],
        )
        .await;
    assert_eq!(400, code);

    let parameters = podium
        .request("queryAuctionParameters", rpc_params![])
        .await;
    assert_eq!(json!(100), parameters["entryAmount"]);
    assert_eq!(json!(3), parameters["size"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lower_bid_is_rejected_and_leaves_state_untouched() {
    let podium = spawn_open_podium().await;
    let alice = Bidder::random();

    podium.submit(&alice, &proof(&alice, 500, "alice-1"), "first").await;
    let lower = proof(&alice, 400, "alice-2");
    let code = podium
        .request_err(
            "submitProofOfBid",
            rpc_params![alice.id(), hex::encode(&lower), alice.sign(&lower), "second"],
        )
        .await;
    assert_eq!(400, code);

    let view = podium
        .request("queryBidder", rpc_params![alice.id()])
        .await;
    assert_eq!(json!(500), view["amount"]);
    assert_eq!(json!("first"), view["note"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn page_snapshot_reflects_the_winning_list() {
    let podium = spawn_open_podium().await;
    let bidders: Vec<_> = (0..4).map(|_| Bidder::random()).collect();
    for (bidder, amount) in bidders.iter().zip([300, 700, 500, 200]) {
        podium
            .submit(bidder, &proof(bidder, amount, "1"), "")
            .await;
    }

    let snapshot = podium
        .request("loadPageSnapshot", rpc_params![bidders[3].id()])
        .await;
    let amounts: Vec<_> = snapshot["leaderboard"]
        .as_array()
        .unwrap()
        .iter()
        .map(|view| view["amount"].as_u64().unwrap())
        .collect();
    assert_eq!(vec![700, 500, 300, 200], amounts);
    // four bidders for three slots: the best losing bid sets the price
    assert_eq!(json!(200), snapshot["clearingPrice"]);
    assert_eq!(json!(4), snapshot["bidder"]["rank"]);
    assert_eq!(json!(4), snapshot["stats"]["uniqueBidders"]);
    assert_eq!(json!(3), snapshot["parameters"]["size"]);

    podium.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_methods_are_not_found() {
    let podium = spawn_open_podium().await;
    let code = podium.request_err("placeBid", rpc_params![]).await;
    assert_eq!(404, code);

    let code = podium.request_err("queryBidder", rpc_params![]).await;
    assert_eq!(400, code);

    podium.shutdown().await;
}
