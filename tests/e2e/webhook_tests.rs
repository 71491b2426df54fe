//! Webhook delivery through the full service.

use super::{merged_pr_payload, TestHarness, ADMIN_TOKEN};
use merge_rewards::{Address, PipelineEvent};
use reqwest::Method;
use serde_json::{json, Value};

const ALICE: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const COMMIT: &str = "abc1230000000000000000000000000000000000000000000000000000000000";

async fn json_of(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn test_merged_pr_end_to_end() {
    let harness = TestHarness::setup_with_ledger().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");

    let payload = merged_pr_payload("org/app", 42, COMMIT, 20, "alice");
    let (status, body) = json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;

    assert_eq!(status, 201, "{body}");
    assert_eq!(body["accepted"], true);
    let id = body["id"].as_str().expect("id");
    assert_eq!(id.len(), 66);
    assert!(id.starts_with("0x"));
    assert_eq!(body["repo"], "org/app");
    assert_eq!(body["commitHash"], format!("0x{COMMIT}"));
    assert_eq!(
        body["beneficiary"]
            .as_str()
            .expect("beneficiary")
            .parse::<Address>()
            .expect("address"),
        Address([0xaa; 20])
    );
    assert_eq!(body["payoutMode"], "NATIVE");
    assert_eq!(body["reward"], "1000");
    assert!(body["evidenceURI"].as_str().is_some_and(|u| !u.is_empty()));
    assert!(body["txHash"].is_string());

    let ledger = harness.ledger().expect("ledger");
    assert_eq!(ledger.submissions().len(), 1);
    assert_eq!(ledger.submissions()[0].id.to_hex(), id);

    let (status, stored) = harness
        .get_json(&format!("/contributions/{id}"))
        .await
        .expect("get");
    assert_eq!(status, 200);
    assert_eq!(stored["txHash"], body["txHash"]);
    assert_eq!(stored["claimed"], false);
    assert_eq!(stored["prNumber"], 42);

    // Beneficiary lookups are case-insensitive.
    let (status, list) = harness
        .get_json(&format!("/contributions?beneficiary={}", ALICE.to_lowercase()))
        .await
        .expect("list");
    assert_eq!(status, 200);
    assert_eq!(list["items"].as_array().expect("items").len(), 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_signature_is_required() {
    let harness = TestHarness::setup().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let payload = merged_pr_payload("org/app", 1, COMMIT, 20, "alice");

    for signature in [None, Some("sha256=00"), Some("not-a-signature")] {
        let (status, body) = json_of(
            harness
                .deliver_with_signature(&payload, signature)
                .await
                .expect("send"),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(body["error"], "invalid_signature");
    }

    let (_, list) = harness
        .get_json(&format!("/contributions?beneficiary={ALICE}"))
        .await
        .expect("list");
    assert!(list["items"].as_array().expect("items").is_empty());

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_other_events_are_acknowledged() {
    let harness = TestHarness::setup().await.expect("setup");

    let (status, body) = json_of(
        harness
            .deliver("ping", &json!({ "zen": "Keep it logically awesome." }))
            .await
            .expect("send"),
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(body, json!({ "received": true, "event": "ping" }));

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let harness = TestHarness::setup().await.expect("setup");

    let (status, body) = json_of(
        harness
            .deliver("pull_request", &json!({ "action": "closed" }))
            .await
            .expect("send"),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_payload");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_policy_rejections() {
    let harness = TestHarness::setup().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");

    let small = merged_pr_payload("org/app", 2, COMMIT, 2, "alice");
    let (status, body) = json_of(harness.deliver("pull_request", &small).await.expect("send")).await;
    assert_eq!(status, 202);
    assert_eq!(
        body,
        json!({ "received": true, "accepted": false, "reasons": ["loc_below_min(2<5)"] })
    );

    let mut unmerged = merged_pr_payload("org/app", 3, COMMIT, 20, "alice");
    unmerged["pull_request"]["merged"] = json!(false);
    let (status, body) =
        json_of(harness.deliver("pull_request", &unmerged).await.expect("send")).await;
    assert_eq!(status, 202);
    assert_eq!(body["reasons"], json!(["pr_not_merged"]));

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_unbound_author() {
    let harness = TestHarness::setup().await.expect("setup");

    let payload = merged_pr_payload("org/app", 4, COMMIT, 20, "bob");
    let (status, body) = json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;
    assert_eq!(status, 202);
    assert_eq!(body["accepted"], false);
    assert_eq!(body["reasons"], json!(["no_bound_wallet_for_author"]));
    assert_eq!(body["author"], "bob");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_duplicate_delivery_returns_stored_row() {
    let harness = TestHarness::setup_with_ledger().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let payload = merged_pr_payload("org/app", 5, COMMIT, 20, "alice");

    let (_, first) = json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;
    let (status, second) =
        json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;

    assert_eq!(status, 201);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["txHash"], second["txHash"]);
    assert_eq!(first["evidenceURI"], second["evidenceURI"]);
    assert_eq!(harness.ledger().expect("ledger").submissions().len(), 1);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_unreachable_ledger_then_backfill() {
    let mut harness = TestHarness::setup_with_ledger().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let ledger = harness.ledger().expect("ledger").clone();
    ledger.set_online(false);

    let payload = merged_pr_payload("org/app", 6, COMMIT, 20, "alice");
    let (status, body) = json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;
    assert_eq!(status, 201);
    assert!(body["txHash"].is_null());
    let id = body["id"].as_str().expect("id").to_string();
    assert_eq!(harness.store().pending_ledger(10).await.expect("pending").len(), 1);

    // While the ledger is still down, backfill reports the failure and keeps the row.
    let (status, report) = harness
        .admin(
            Method::POST,
            "/admin/reconcile/backfill",
            Some(&json!({})),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("backfill");
    assert_eq!(status, 200);
    assert_eq!(report["attached"], 0);
    assert_eq!(report["results"][0]["status"], "failed");

    ledger.set_online(true);
    let (status, report) = harness
        .admin(
            Method::POST,
            "/admin/reconcile/backfill",
            Some(&json!({ "limit": 10 })),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("backfill");
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["examined"], 1);
    assert_eq!(report["attached"], 1);
    assert_eq!(report["results"][0]["id"], id.as_str());
    assert_eq!(report["results"][0]["status"], "attached");
    let tx_hash = report["results"][0]["txHash"].clone();
    assert!(tx_hash.is_string());

    let (_, stored) = harness
        .get_json(&format!("/contributions/{id}"))
        .await
        .expect("get");
    assert_eq!(stored["txHash"], tx_hash);

    // A redelivery after backfill neither duplicates the row nor re-registers.
    let (_, again) = json_of(harness.deliver("pull_request", &payload).await.expect("send")).await;
    assert_eq!(again["txHash"], tx_hash);
    assert_eq!(ledger.submissions().len(), 1);
    assert!(harness.store().pending_ledger(10).await.expect("pending").is_empty());

    let mut saw_attach = false;
    while let Ok(event) = harness.events().try_recv() {
        if matches!(event, PipelineEvent::LedgerAttached { .. }) {
            saw_attach = true;
        }
    }
    assert!(saw_attach);

    harness.teardown().await.expect("teardown");
}
