//! # merge-rewards
//!
//! Turns merged GitHub pull requests into payable contributions.
//!
//! A signed `pull_request` webhook is checked against the repository's
//! payout policy, the author is resolved to a bound payable address, evidence
//! is published, and the contribution is recorded in a local SQLite store
//! (authoritative) and, best-effort, in an on-chain contribution registry.
//! Reconciliation jobs later backfill registrations the ledger missed and
//! fold on-chain claims back into the store.
//!
//! ## Architecture
//!
//! ```text
//! webhook ─▶ policy ─▶ identity ─▶ evidence ─▶ ledger (best-effort)
//!                                                  │
//!                                                  ▼
//!                                     store (authoritative) ◀── reconcile
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use merge_rewards::{NodeBuilder, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> merge_rewards::Result<()> {
//!     let config = ServiceConfig::default();
//!     let mut node = NodeBuilder::new(config).build().await?;
//!     node.run().await
//! }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod evidence;
pub mod github;
pub mod identity;
pub mod ledger;
pub mod node;
pub mod pipeline;
pub mod policy;
pub mod primitives;
pub mod reconcile;
pub mod store;
pub mod webhook;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use event::{PipelineEvent, PipelineEventsChannel};
pub use ledger::{Ledger, LedgerRegistrar, LedgerStatus, RegistrationCall};
pub use node::{NodeBuilder, RunningNode};
pub use pipeline::{Outcome, Pipeline};
pub use primitives::{Address, ContributionId, PayoutMode, RewardAmount, TxHash, H256};
pub use reconcile::Reconciler;
pub use store::{Contribution, ContributionStore, RepoSchema};
