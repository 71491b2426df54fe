//! Pipeline event system.

use crate::primitives::{Address, ContributionId, TxHash};
use tokio::sync::broadcast;

/// Events emitted by the registration pipeline and its jobs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Service has started successfully.
    Started,

    /// Service is shutting down.
    ShuttingDown,

    /// A pull request failed policy evaluation.
    PolicyRejected {
        /// Repository (`owner/name`).
        repo: String,
        /// Pull request number.
        pr_number: u64,
        /// Rejection codes.
        reasons: Vec<String>,
    },

    /// A qualifying pull request's author has no bound address.
    AuthorUnbound {
        /// Repository (`owner/name`).
        repo: String,
        /// Author handle, if the payload carried one.
        author: Option<String>,
    },

    /// A contribution was written to the store for the first time.
    ContributionRegistered {
        /// Contribution id.
        id: ContributionId,
        /// Payable address.
        beneficiary: Address,
        /// Whether a ledger transaction was attached at registration time.
        on_chain: bool,
    },

    /// A ledger transaction was attached to a stored contribution.
    LedgerAttached {
        /// Contribution id.
        id: ContributionId,
        /// Registration transaction.
        tx_hash: TxHash,
    },

    /// A ledger registration attempt failed and was deferred to backfill.
    LedgerWriteFailed {
        /// Contribution id.
        id: ContributionId,
        /// Failure description.
        message: String,
    },

    /// A contribution was confirmed claimed on the ledger.
    ClaimConfirmed {
        /// Contribution id.
        id: ContributionId,
    },

    /// A reconciliation pass finished.
    ReconcileComplete {
        /// Transactions attached by backfill.
        attached: usize,
        /// Claims folded back from the ledger.
        claimed: usize,
    },
}

/// Channel for receiving pipeline events.
pub type PipelineEventsChannel = broadcast::Receiver<PipelineEvent>;

/// Sender for pipeline events.
pub type PipelineEventsSender = broadcast::Sender<PipelineEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (PipelineEventsSender, PipelineEventsChannel) {
    broadcast::channel(256)
}
