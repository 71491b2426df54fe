//! Typed pull-request event model.
//!
//! The upstream payload is loosely shaped; it is validated here once and no
//! pipeline stage ever sees the raw JSON.

use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawPullRequestEvent {
    action: Option<String>,
    number: Option<u64>,
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
    organization: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    merged: Option<bool>,
    merge_commit_sha: Option<String>,
    head: Option<RawRef>,
    additions: Option<i64>,
    deletions: Option<i64>,
    user: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: Option<String>,
    name: Option<String>,
    owner: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    login: Option<String>,
}

/// A validated pull-request lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    /// Lifecycle action (`opened`, `closed`, ...).
    pub action: String,
    /// Repository as `owner/name`.
    pub repo: String,
    /// Pull request number.
    pub pr_number: u64,
    /// Whether the pull request was merged.
    pub merged: bool,
    /// Merge commit for merged PRs, head commit otherwise.
    pub commit_sha: String,
    /// Lines added.
    pub additions: i64,
    /// Lines deleted.
    pub deletions: i64,
    /// Author handle.
    pub author: Option<String>,
}

/// Returns true for a well-formed `owner/name` repository identifier.
#[must_use]
pub fn is_valid_repo(repo: &str) -> bool {
    let mut parts = repo.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.trim().is_empty() && !name.trim().is_empty()
    )
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PullRequestEvent {
    /// Parse and validate a `pull_request` webhook body.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the body is not JSON, lacks a pull
    /// request, a resolvable repository, a PR number or a commit identifier.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let raw: RawPullRequestEvent = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidInput(format!("malformed payload: {e}")))?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawPullRequestEvent> for PullRequestEvent {
    type Error = Error;

    fn try_from(raw: RawPullRequestEvent) -> Result<Self> {
        let pr = raw
            .pull_request
            .ok_or_else(|| Error::InvalidInput("payload has no pull_request".to_string()))?;

        // Prefer the canonical full_name so storage and lookups agree.
        let repository = raw.repository;
        let repo = repository
            .as_ref()
            .and_then(|r| non_empty(r.full_name.clone()))
            .or_else(|| {
                let repository = repository.as_ref()?;
                let owner = repository
                    .owner
                    .as_ref()
                    .and_then(|o| non_empty(o.login.clone()))
                    .or_else(|| {
                        raw.organization
                            .as_ref()
                            .and_then(|o| non_empty(o.login.clone()))
                    })?;
                let name = non_empty(repository.name.clone())?;
                Some(format!("{owner}/{name}"))
            })
            .filter(|r| is_valid_repo(r))
            .ok_or_else(|| Error::InvalidInput("payload has no resolvable repository".to_string()))?;

        let pr_number = raw
            .number
            .or(pr.number)
            .ok_or_else(|| Error::InvalidInput("payload has no pull request number".to_string()))?;

        let merged = pr.merged.unwrap_or(false);
        let merge_commit = if merged {
            non_empty(pr.merge_commit_sha)
        } else {
            None
        };
        let commit_sha = merge_commit
            .or_else(|| pr.head.and_then(|h| non_empty(h.sha)))
            .ok_or_else(|| Error::InvalidInput("payload has no commit identifier".to_string()))?;

        Ok(Self {
            action: raw.action.unwrap_or_default(),
            repo,
            pr_number,
            merged,
            commit_sha,
            additions: pr.additions.unwrap_or(0),
            deletions: pr.deletions.unwrap_or(0),
            author: pr.user.and_then(|u| non_empty(u.login)),
        })
    }
}
