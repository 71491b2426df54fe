//! End-to-end tests for merge-rewards.
//!
//! Each test starts the full HTTP service on an ephemeral port with an
//! in-memory store and, where the ledger matters, an in-process ledger, then
//! drives it over HTTP the way GitHub and API clients do.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod harness;
mod ledger;

mod admin_tests;
mod claim_tests;
mod webhook_tests;

pub use harness::{merged_pr_payload, HarnessError, TestHarness, ADMIN_TOKEN, WEBHOOK_SECRET};
pub use ledger::TestLedger;
