//! Durable contribution records.
//!
//! The store is the authoritative record of every accepted contribution, the
//! per-repository payout schemas and the handle/address bindings. The ledger
//! is best-effort; everything it misses is recovered from here by the
//! reconciler.
//!
//! ## Tables
//!
//! - `contributions` - one row per contribution id, never overwritten
//! - `repo_schemas` - per-repository payout configuration
//! - `identity_bindings` - handle/address bijection

mod schema;
mod sqlite;

pub use sqlite::ContributionStore;

use crate::primitives::{Address, ContributionId, PayoutMode, RewardAmount, TxHash, H256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    /// Deterministic id (`keccak256(repo || commitHash)`).
    pub id: ContributionId,
    /// Repository (`owner/name`).
    pub repo: String,
    /// 32-byte commit digest.
    pub commit_hash: H256,
    /// Payable address.
    pub beneficiary: Address,
    /// Evidence locator.
    #[serde(rename = "evidenceURI")]
    pub evidence_uri: String,
    /// Reward in the payout asset's smallest unit.
    pub reward: RewardAmount,
    /// Payout mode.
    pub payout_mode: PayoutMode,
    /// ERC-20 token; always `None` for native payouts.
    pub token_address: Option<Address>,
    /// Signing account of the registrar, when the ledger was active.
    pub registrar: Option<Address>,
    /// Registration transaction, once known.
    #[serde(rename = "txHash")]
    pub ledger_tx_hash: Option<TxHash>,
    /// Whether the reward was claimed on the ledger.
    pub claimed: bool,
    /// Claim transaction reported by the claimant.
    pub claim_tx_hash: Option<TxHash>,
    /// Author handle.
    pub author_handle: Option<String>,
    /// Pull request number.
    pub pr_number: Option<u64>,
    /// First registration time.
    pub registered_at: DateTime<Utc>,
}

/// Per-repository payout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSchema {
    /// Repository (`owner/name`), matched case-insensitively.
    pub repo: String,
    /// Minimum lines of code.
    pub min_loc: u64,
    /// Payout mode.
    pub payout_mode: PayoutMode,
    /// Reward in the payout asset's smallest unit.
    pub reward: RewardAmount,
    /// Token for ERC-20 payouts.
    pub token_address: Option<Address>,
    /// Last editor.
    pub updated_by: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}
