//! Contribution registry ledger.
//!
//! The ledger is an external EVM contract reached over JSON-RPC. It is
//! best-effort: the registrar goes inert when the ledger is disabled or
//! misconfigured, and every failure is reported to the caller to absorb.
//! Contributions that missed the ledger are retried by the reconciler's
//! backfill.

pub mod abi;
mod id;
mod registrar;
mod rpc;

pub use id::{commit_digest, compute_id};
pub use registrar::{LedgerRegistrar, LedgerWrite};
pub use rpc::RpcLedger;

use crate::error::Result;
use crate::primitives::{Address, ContributionId, PayoutMode, RewardAmount, TxHash, H256};
use async_trait::async_trait;

/// Arguments of a `registerContribution` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationCall {
    /// Contribution id.
    pub id: ContributionId,
    /// Payable address.
    pub beneficiary: Address,
    /// Repository (`owner/name`).
    pub repo: String,
    /// 32-byte commit digest.
    pub commit_hash: H256,
    /// Evidence locator.
    pub evidence_uri: String,
    /// Reward in the payout asset's smallest unit.
    pub reward: RewardAmount,
    /// Payout mode.
    pub payout_mode: PayoutMode,
    /// ERC-20 token, or the zero address for native payouts.
    pub token: Address,
}

/// What the ledger knows about a contribution id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStatus {
    /// The id is registered.
    pub registered: bool,
    /// The reward has been claimed.
    pub claimed: bool,
}

/// An on-chain contribution registry.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a registration and wait for its receipt.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails, the receipt does not arrive in
    /// time, or the transaction reverted.
    async fn register_contribution(&self, call: &RegistrationCall) -> Result<TxHash>;

    /// Read the registered and claimed flags for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be queried.
    async fn contribution_status(&self, id: &ContributionId) -> Result<LedgerStatus>;

    /// The account registrations are signed with.
    fn registrar_address(&self) -> Address;
}
