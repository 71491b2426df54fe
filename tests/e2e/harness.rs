//! Test harness that runs the full service against an in-process ledger.
//!
//! The `TestHarness` builds the service through `NodeBuilder` with an
//! in-memory store, binds it to an ephemeral port and exposes helpers for
//! signed webhook deliveries and admin calls.

use super::ledger::TestLedger;
use hmac::{Hmac, Mac};
use merge_rewards::config::PayoutDefaults;
use merge_rewards::{
    ContributionStore, LedgerRegistrar, NodeBuilder, PipelineEventsChannel, ServiceConfig,
};
use serde_json::{json, Value};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Shared webhook secret configured on the service.
pub const WEBHOOK_SECRET: &str = "e2e-webhook-secret";

/// Admin bearer token configured on the service.
pub const ADMIN_TOKEN: &str = "e2e-admin-token";

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Service error
    #[error("Service error: {0}")]
    Service(#[from] merge_rewards::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service task did not stop
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Service answered something other than expected
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// A `pull_request` delivery for a merged PR.
#[must_use]
pub fn merged_pr_payload(repo: &str, number: u64, sha: &str, additions: i64, author: &str) -> Value {
    json!({
        "action": "closed",
        "number": number,
        "pull_request": {
            "number": number,
            "merged": true,
            "merge_commit_sha": sha,
            "head": { "sha": "ffffffffffffffffffffffffffffffffffffffff" },
            "additions": additions,
            "deletions": 1,
            "user": { "login": author }
        },
        "repository": { "full_name": repo }
    })
}

fn sign(body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).expect("HMAC accepts any key");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Test harness that manages one running service.
pub struct TestHarness {
    addr: SocketAddr,
    client: reqwest::Client,
    store: ContributionStore,
    ledger: Option<Arc<TestLedger>>,
    events: PipelineEventsChannel,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<merge_rewards::Result<()>>,
}

impl TestHarness {
    /// Start a service without a ledger (off-chain only).
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails to start.
    pub async fn setup() -> Result<Self> {
        Self::start(None, Some(ADMIN_TOKEN)).await
    }

    /// Start a service whose registrar writes to a fresh `TestLedger`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails to start.
    pub async fn setup_with_ledger() -> Result<Self> {
        Self::start(Some(Arc::new(TestLedger::new())), Some(ADMIN_TOKEN)).await
    }

    /// Start a service with admin endpoints disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails to start.
    pub async fn setup_without_admin() -> Result<Self> {
        Self::start(None, None).await
    }

    async fn start(ledger: Option<Arc<TestLedger>>, admin_token: Option<&str>) -> Result<Self> {
        let mut config = ServiceConfig::default();
        config.server.listen = SocketAddr::from(([127, 0, 0, 1], 0));
        config.webhook.secret = Some(WEBHOOK_SECRET.to_string());
        config.github.check_ci = false;
        config.reconcile.interval_secs = 0;
        config.admin.token = admin_token.map(str::to_string);
        config.defaults = PayoutDefaults {
            reward: "1000".parse()?,
            ..PayoutDefaults::default()
        };

        let store = ContributionStore::open_in_memory()?;
        let registrar = ledger.as_ref().map_or_else(LedgerRegistrar::disabled, |l| {
            LedgerRegistrar::with_ledger(l.clone(), Duration::from_secs(2))
        });

        let mut node = NodeBuilder::new(config)
            .with_store(store.clone())
            .with_registrar(registrar)
            .build()
            .await?;
        let addr = node.local_addr();
        let events = node.subscribe_events();
        let shutdown = node.shutdown_handle();
        let task = tokio::spawn(async move { node.run().await });
        info!("Test service listening on {addr}");

        Ok(Self {
            addr,
            client: reqwest::Client::new(),
            store,
            ledger,
            events,
            shutdown,
            task,
        })
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// The service's store.
    #[must_use]
    pub fn store(&self) -> &ContributionStore {
        &self.store
    }

    /// The in-process ledger, if the service has one.
    #[must_use]
    pub fn ledger(&self) -> Option<&Arc<TestLedger>> {
        self.ledger.as_ref()
    }

    /// Pipeline events emitted since setup.
    pub fn events(&mut self) -> &mut PipelineEventsChannel {
        &mut self.events
    }

    /// Deliver `payload` as a correctly signed `event` webhook.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn deliver(&self, event: &str, payload: &Value) -> Result<reqwest::Response> {
        let body = payload.to_string();
        Ok(self
            .client
            .post(self.url("/webhook"))
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-github-delivery", "e2e-delivery")
            .header("x-hub-signature-256", sign(body.as_bytes()))
            .body(body)
            .send()
            .await?)
    }

    /// Deliver `payload` with an arbitrary signature header.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn deliver_with_signature(
        &self,
        payload: &Value,
        signature: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(self.url("/webhook"))
            .header("x-github-event", "pull_request")
            .body(payload.to_string());
        if let Some(signature) = signature {
            request = request.header("x-hub-signature-256", signature);
        }
        Ok(request.send().await?)
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn get_json(&self, path: &str) -> Result<(u16, Value)> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// POST `body` to `path` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<(u16, Value)> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// Send an admin request with `token` as the bearer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn admin(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<(u16, Value)> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// Bind `handle` to `address` through the admin API.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is not accepted.
    pub async fn bind(&self, handle: &str, address: &str) -> Result<()> {
        let (status, body) = self
            .admin(
                reqwest::Method::POST,
                "/admin/bindings",
                Some(&json!({ "handle": handle, "address": address })),
                Some(ADMIN_TOKEN),
            )
            .await?;
        if status == 200 {
            Ok(())
        } else {
            Err(HarnessError::Unexpected(format!("binding rejected: {status} {body}")))
        }
    }

    /// Stop the service and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails or does not stop in time.
    pub async fn teardown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(Duration::from_secs(5), self.task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(HarnessError::Shutdown(e.to_string())),
            Err(_) => Err(HarnessError::Shutdown("service did not stop".to_string())),
        }
    }
}
