//! Claim confirmation and claim sync.

use super::{merged_pr_payload, TestHarness, ADMIN_TOKEN};
use merge_rewards::ContributionId;
use reqwest::Method;
use serde_json::{json, Value};

const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const CLAIM_TX: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

async fn register(harness: &TestHarness, number: u64, sha: &str) -> String {
    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", number, sha, 20, "alice"))
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.expect("json");
    body["id"].as_str().expect("id").to_string()
}

#[tokio::test]
async fn test_claim_mark_without_ledger() {
    let harness = TestHarness::setup().await.expect("setup");

    let (status, body) = harness
        .post_json("/claim/mark", &json!({ "id": "0x1234" }))
        .await
        .expect("post");
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_id");

    let id = format!("0x{}", "ab".repeat(32));
    let (status, body) = harness
        .post_json("/claim/mark", &json!({ "id": id }))
        .await
        .expect("post");
    assert_eq!(status, 503);
    assert_eq!(body["error"], "chain_unavailable");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_claim_mark_follows_ledger() {
    let harness = TestHarness::setup_with_ledger().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let id = register(&harness, 10, "1111111111111111111111111111111111111111").await;

    let (status, body) = harness
        .post_json("/claim/mark", &json!({ "id": id, "txHash": CLAIM_TX }))
        .await
        .expect("post");
    assert_eq!(status, 202);
    assert_eq!(body, json!({ "ok": false, "claimed": false }));

    let parsed: ContributionId = id.parse().expect("id");
    harness.ledger().expect("ledger").claim(&parsed);

    let (status, body) = harness
        .post_json("/claim/mark", &json!({ "id": id, "txHash": CLAIM_TX }))
        .await
        .expect("post");
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "ok": true, "claimed": true }));

    let (_, stored) = harness
        .get_json(&format!("/contributions/{id}"))
        .await
        .expect("get");
    assert_eq!(stored["claimed"], true);
    assert_eq!(stored["claimTxHash"], CLAIM_TX);

    // Claimed never reverts, and the first claim tx is kept.
    let (status, _) = harness
        .post_json("/claim/mark", &json!({ "id": id }))
        .await
        .expect("post");
    assert_eq!(status, 200);
    let (_, stored) = harness
        .get_json(&format!("/contributions/{id}"))
        .await
        .expect("get");
    assert_eq!(stored["claimed"], true);
    assert_eq!(stored["claimTxHash"], CLAIM_TX);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_claim_sync_folds_ledger_claims() {
    let harness = TestHarness::setup_with_ledger().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let claimed = register(&harness, 11, "2222222222222222222222222222222222222222").await;
    let open = register(&harness, 12, "3333333333333333333333333333333333333333").await;

    harness
        .ledger()
        .expect("ledger")
        .claim(&claimed.parse().expect("id"));

    let (status, report) = harness
        .admin(
            Method::POST,
            "/admin/reconcile/claims",
            Some(&json!({ "beneficiary": ALICE })),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("sync");
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["checked"], 2);
    assert_eq!(report["claimed"], 1);

    let (_, stored) = harness
        .get_json(&format!("/contributions/{claimed}"))
        .await
        .expect("get");
    assert_eq!(stored["claimed"], true);
    let (_, stored) = harness
        .get_json(&format!("/contributions/{open}"))
        .await
        .expect("get");
    assert_eq!(stored["claimed"], false);

    // A second pass only checks what is still unclaimed.
    let (_, report) = harness
        .admin(
            Method::POST,
            "/admin/reconcile/claims",
            Some(&json!({ "beneficiary": ALICE })),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("sync");
    assert_eq!(report["checked"], 1);
    assert_eq!(report["claimed"], 0);

    harness.teardown().await.expect("teardown");
}
