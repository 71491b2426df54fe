//! Admin endpoints, repository schemas and read-only queries.

use super::{merged_pr_payload, TestHarness, ADMIN_TOKEN};
use reqwest::Method;
use serde_json::{json, Value};

const ALICE: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const TOKEN: &str = "0x7070707070707070707070707070707070707070";
const SHA: &str = "4444444444444444444444444444444444444444";

async fn put_schema(harness: &TestHarness, body: &Value, token: Option<&str>) -> (u16, Value) {
    harness
        .admin(Method::PUT, "/admin/repos/schema", Some(body), token)
        .await
        .expect("put schema")
}

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::setup().await.expect("setup");
    let (status, body) = harness.get_json("/health").await.expect("health");
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert!(body["ts"].as_i64().is_some_and(|ts| ts > 0));
    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_admin_requires_token() {
    let harness = TestHarness::setup().await.expect("setup");
    let body = json!({ "handle": "alice", "address": ALICE });

    let (status, response) = harness
        .admin(Method::POST, "/admin/bindings", Some(&body), None)
        .await
        .expect("post");
    assert_eq!(status, 401);
    assert_eq!(response["error"], "unauthorized");

    let (status, _) = harness
        .admin(Method::POST, "/admin/bindings", Some(&body), Some("wrong"))
        .await
        .expect("post");
    assert_eq!(status, 401);

    let (status, _) = harness
        .admin(Method::POST, "/admin/bindings", Some(&body), Some(ADMIN_TOKEN))
        .await
        .expect("post");
    assert_eq!(status, 200);

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_admin_disabled_without_token() {
    let harness = TestHarness::setup_without_admin().await.expect("setup");
    let (status, body) = harness
        .admin(
            Method::POST,
            "/admin/bindings",
            Some(&json!({ "handle": "alice", "address": ALICE })),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("post");
    assert_eq!(status, 403);
    assert_eq!(body["error"], "disabled");
    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_repo_schema_lifecycle() {
    let harness = TestHarness::setup().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");

    let (status, body) = harness
        .get_json("/repos/schema?repo=org/app")
        .await
        .expect("get");
    assert_eq!(status, 200);
    assert!(body["schema"].is_null());

    let (status, body) = put_schema(
        &harness,
        &json!({ "repo": "org/app", "payoutMode": "ERC20", "reward": "7" }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_request");

    let (status, _) = put_schema(
        &harness,
        &json!({ "repo": "org/app", "payoutMode": "NATIVE", "reward": "-1" }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, 400);

    let (status, body) = put_schema(
        &harness,
        &json!({
            "repo": "org/app",
            "minLoc": 50,
            "payoutMode": "ERC20",
            "reward": "7",
            "tokenAddress": TOKEN,
            "updatedBy": "ops"
        }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, 200, "{body}");

    // Lookups ignore repository case.
    let (_, body) = harness
        .get_json("/repos/schema?repo=ORG/App")
        .await
        .expect("get");
    assert_eq!(body["schema"]["payoutMode"], "ERC20");
    assert_eq!(body["schema"]["minLoc"], 50);
    assert_eq!(body["schema"]["reward"], "7");

    // The schema's threshold now applies to deliveries.
    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", 20, SHA, 20, "alice"))
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 202);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["reasons"], json!(["loc_below_min(20<50)"]));

    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", 21, SHA, 60, "alice"))
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["payoutMode"], "ERC20");
    assert_eq!(body["reward"], "7");

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_rebinding_moves_the_address() {
    let harness = TestHarness::setup().await.expect("setup");

    let (status, _) = harness
        .admin(
            Method::POST,
            "/admin/bindings",
            Some(&json!({ "handle": "alice", "address": "0x1234" })),
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("post");
    assert_eq!(status, 400);

    harness.bind("alice", ALICE).await.expect("bind");
    harness.bind("bob", ALICE).await.expect("rebind");

    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", 30, SHA, 20, "alice"))
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 202);

    harness.bind("alice", BOB).await.expect("bind");
    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", 30, SHA, 20, "alice"))
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["beneficiary"].as_str().map(str::to_lowercase), Some(BOB.to_string()));

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_inspect_reports_registration_state() {
    let harness = TestHarness::setup().await.expect("setup");
    harness.bind("alice", ALICE).await.expect("bind");
    let path = format!("/admin/inspect?repo=org/app&commit={SHA}&author=alice");

    let (status, before) = harness
        .admin(Method::GET, &path, None, Some(ADMIN_TOKEN))
        .await
        .expect("inspect");
    assert_eq!(status, 200);
    assert_eq!(before["registered"], false);
    assert!(before["boundAddress"].is_string());

    let response = harness
        .deliver("pull_request", &merged_pr_payload("org/app", 40, SHA, 20, "alice"))
        .await
        .expect("send");
    let delivered: Value = response.json().await.expect("json");

    let (_, after) = harness
        .admin(Method::GET, &path, None, Some(ADMIN_TOKEN))
        .await
        .expect("inspect");
    assert_eq!(after["id"], delivered["id"]);
    assert_eq!(after["id"], before["id"]);
    assert_eq!(after["registered"], true);
    assert_eq!(after["onChain"], false);
    assert_eq!(after["claimed"], false);
    assert!(after["ledger"].is_null());

    harness.teardown().await.expect("teardown");
}

#[tokio::test]
async fn test_contribution_queries_validate_input() {
    let harness = TestHarness::setup().await.expect("setup");

    let (status, body) = harness.get_json("/contributions").await.expect("get");
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = harness
        .get_json("/contributions?beneficiary=0xnothex")
        .await
        .expect("get");
    assert_eq!(status, 400, "{body}");

    let (status, body) = harness.get_json("/contributions/0x12").await.expect("get");
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_id");

    let missing = format!("/contributions/0x{}", "cd".repeat(32));
    let (status, body) = harness.get_json(&missing).await.expect("get");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not_found");

    let (status, body) = harness
        .get_json(&format!("/contributions?beneficiary={ALICE}&limit=500"))
        .await
        .expect("get");
    assert_eq!(status, 200);
    assert!(body["items"].as_array().is_some_and(Vec::is_empty));

    let (status, _) = harness
        .admin(
            Method::POST,
            "/admin/reconcile/backfill",
            None,
            Some(ADMIN_TOKEN),
        )
        .await
        .expect("backfill");
    assert_eq!(status, 503);

    harness.teardown().await.expect("teardown");
}
