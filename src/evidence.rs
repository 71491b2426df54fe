//! Evidence publishing.
//!
//! Every accepted contribution carries a locator for a JSON snapshot of the
//! decision and its inputs. The snapshot is pinned with the configured
//! provider; when pinning is impossible the publisher falls back to a
//! deterministic placeholder derived from the snapshot's hash, so
//! registration never waits on an unavailable provider.
//!
//! ```text
//! publish(evidence)
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Provider configured │──── stub ─────┐
//! └─────────┬───────────┘               │
//!           │                           │
//!      pin over HTTP                    │
//!           │                           │
//!    ┌──────┴──────┐                    │
//!    │             │                    │
//!   OK          FAILED                  │
//!    │             │                    │
//!    ▼             ▼                    ▼
//! ipfs://<cid>   ipfs://bafy<sha256(json)[..40]>
//! ```

use crate::config::{EvidenceConfig, EvidenceProviderKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

const PINATA_API: &str = "https://api.pinata.cloud";
const WEB3STORAGE_API: &str = "https://api.web3.storage";
const PIN_NAME: &str = "merge-rewards-evidence";

/// Snapshot of a registration decision and its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Repository (`owner/name`).
    pub repo: String,
    /// Commit identifier as received from the event source.
    pub commit_hash: String,
    /// Author handle.
    pub author: Option<String>,
    /// Pull request number.
    pub pr_number: u64,
    /// Decision inputs.
    pub metadata: EvidenceMetadata,
}

/// Decision inputs recorded with the evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    /// Lines added.
    pub additions: i64,
    /// Lines deleted.
    pub deletions: i64,
    /// Policy details.
    pub policy: PolicySnapshot,
}

/// Policy details recorded with the evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Lines of code counted by the policy.
    pub loc: u64,
    /// Threshold that was applied.
    pub min_loc: u64,
}

#[derive(Debug, Deserialize)]
struct PinataResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Debug, Deserialize)]
struct Web3StorageResponse {
    cid: String,
}

/// Publishes evidence snapshots and returns their locators.
pub struct EvidencePublisher {
    provider: EvidenceProviderKind,
    http: reqwest::Client,
    endpoint: String,
    credential: Option<String>,
}

impl EvidencePublisher {
    /// Create a publisher for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &EvidenceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (default_endpoint, credential) = match config.provider {
            EvidenceProviderKind::Stub => ("", None),
            EvidenceProviderKind::Pinata => (PINATA_API, config.pinata_jwt.clone()),
            EvidenceProviderKind::Web3Storage => {
                (WEB3STORAGE_API, config.web3storage_token.clone())
            }
        };
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint.to_string())
            .trim_end_matches('/')
            .to_string();

        info!("Evidence publisher initialized (provider={:?})", config.provider);

        Ok(Self {
            provider: config.provider,
            http,
            endpoint,
            credential: credential.filter(|c| !c.is_empty()),
        })
    }

    /// The configured provider.
    #[must_use]
    pub fn provider(&self) -> EvidenceProviderKind {
        self.provider
    }

    /// Publish `evidence` and return its locator. Never fails.
    pub async fn publish(&self, evidence: &Evidence) -> String {
        match self.pin(evidence).await {
            Ok(Some(uri)) => {
                debug!("Pinned evidence for {} at {uri}", evidence.repo);
                uri
            }
            Ok(None) => placeholder_uri(evidence),
            Err(e) => {
                warn!("Evidence pin failed, using placeholder locator: {e}");
                placeholder_uri(evidence)
            }
        }
    }

    /// Pin with the configured provider. `Ok(None)` means no provider.
    async fn pin(&self, evidence: &Evidence) -> Result<Option<String>> {
        match self.provider {
            EvidenceProviderKind::Stub => Ok(None),
            EvidenceProviderKind::Pinata => self.pin_pinata(evidence).await.map(Some),
            EvidenceProviderKind::Web3Storage => self.pin_web3storage(evidence).await.map(Some),
        }
    }

    fn credential(&self, name: &str) -> Result<&str> {
        self.credential
            .as_deref()
            .ok_or_else(|| Error::Evidence(format!("{name} missing")))
    }

    async fn pin_pinata(&self, evidence: &Evidence) -> Result<String> {
        let jwt = self.credential("pinata_jwt")?;
        let body = serde_json::json!({
            "pinataContent": evidence,
            "pinataMetadata": { "name": PIN_NAME },
        });

        let response = self
            .http
            .post(format!("{}/pinning/pinJSONToIPFS", self.endpoint))
            .bearer_auth(jwt)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Evidence(format!("Pinata request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Evidence(format!("Pinata failed: {status} {text}")));
        }
        let parsed: PinataResponse = response
            .json()
            .await
            .map_err(|e| Error::Evidence(format!("bad Pinata response: {e}")))?;
        Ok(format!("ipfs://{}", parsed.ipfs_hash))
    }

    async fn pin_web3storage(&self, evidence: &Evidence) -> Result<String> {
        let token = self.credential("web3storage_token")?;
        let bytes = serde_json::to_vec_pretty(evidence)
            .map_err(|e| Error::Evidence(format!("serialize evidence: {e}")))?;

        let response = self
            .http
            .post(format!("{}/upload", self.endpoint))
            .bearer_auth(token)
            .header("X-NAME", "evidence.json")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Evidence(format!("Web3.Storage request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Evidence(format!(
                "Web3.Storage failed: {status} {text}"
            )));
        }
        let parsed: Web3StorageResponse = response
            .json()
            .await
            .map_err(|e| Error::Evidence(format!("bad Web3.Storage response: {e}")))?;
        Ok(format!("ipfs://{}", parsed.cid))
    }
}

/// Deterministic placeholder locator for `evidence`.
#[must_use]
pub fn placeholder_uri(evidence: &Evidence) -> String {
    let bytes = serde_json::to_vec(evidence).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let hex = hex::encode(digest);
    format!("ipfs://bafy{}", &hex[..40])
}
