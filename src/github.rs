//! GitHub API client for policy inputs.

use crate::config::GithubConfig;
use crate::error::{Error, Result};
use crate::policy::CiStatus;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("merge-rewards/", env!("CARGO_PKG_VERSION"));

/// Source of aggregate CI status for a commit.
#[async_trait]
pub trait CommitStatusSource: Send + Sync {
    /// Fetch the combined status of `sha` in `repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be fetched; callers treat this
    /// as "no information".
    async fn combined_status(&self, repo: &str, sha: &str) -> Result<Option<CiStatus>>;
}

#[derive(Debug, Deserialize)]
struct CombinedStatusResponse {
    state: Option<String>,
    total_count: Option<u64>,
    #[serde(default)]
    statuses: Vec<serde_json::Value>,
}

/// GitHub REST API client.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl CommitStatusSource for GithubClient {
    async fn combined_status(&self, repo: &str, sha: &str) -> Result<Option<CiStatus>> {
        let url = format!("{}/repos/{repo}/commits/{sha}/status", self.api_base);
        debug!("Fetching combined status from {url}");

        let mut request = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "GitHub status fetch failed: {status} {body}"
            )));
        }

        let parsed: CombinedStatusResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("bad status response: {e}")))?;

        Ok(parsed.state.map(|state| CiStatus {
            state,
            total_count: parsed
                .total_count
                .unwrap_or(parsed.statuses.len() as u64),
        }))
    }
}
