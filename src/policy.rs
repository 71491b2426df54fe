//! Contribution policy evaluation.
//!
//! A pure decision function: the same inputs always produce the same
//! decision, and nothing here performs I/O. The CI status is looked up by the
//! caller beforehand, and lookup failures are passed in as "no information".

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle action that can produce a contribution.
pub const CLOSED_ACTION: &str = "closed";

/// The aggregate CI state that satisfies the policy.
pub const CI_SUCCESS: &str = "success";

/// Aggregate CI status for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiStatus {
    /// Combined state (`success`, `pending`, `failure`, `error`).
    pub state: String,
    /// Number of checks that reported.
    pub total_count: u64,
}

/// Inputs to a single policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInput<'a> {
    /// Lifecycle action of the event.
    pub action: &'a str,
    /// Whether the pull request was merged.
    pub merged: bool,
    /// Lines added (may be negative or absent upstream; clamped to zero).
    pub additions: i64,
    /// CI status, if it could be determined.
    pub ci_status: Option<&'a CiStatus>,
    /// Minimum lines of code for this repository.
    pub min_loc: u64,
}

/// Why a pull request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Event action was not `closed`.
    ActionNotClosed,
    /// Pull request was closed without merging.
    NotMerged,
    /// Additions below the repository threshold.
    LocBelowMin {
        /// Counted lines.
        actual: u64,
        /// Required lines.
        threshold: u64,
    },
    /// Checks reported and did not all succeed.
    CiNotSuccess {
        /// Reported combined state.
        state: String,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActionNotClosed => f.write_str("action_not_closed"),
            Self::NotMerged => f.write_str("pr_not_merged"),
            Self::LocBelowMin { actual, threshold } => {
                write!(f, "loc_below_min({actual}<{threshold})")
            }
            Self::CiNotSuccess { state } => write!(f, "ci_status_not_success({state})"),
        }
    }
}

impl Serialize for RejectReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of evaluating a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    /// True iff no rule failed.
    pub accepted: bool,
    /// Every failing rule, in evaluation order.
    pub reasons: Vec<RejectReason>,
    /// Lines of code counted for the threshold rule.
    pub loc: u64,
}

impl PolicyDecision {
    /// Rejection codes as strings.
    #[must_use]
    pub fn reason_codes(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/// Evaluate every rule independently and collect all failures.
///
/// Lines of code are counted as additions only; deletions never lower the
/// count.
#[must_use]
pub fn evaluate(input: &PolicyInput<'_>) -> PolicyDecision {
    let mut reasons = Vec::new();

    if input.action != CLOSED_ACTION {
        reasons.push(RejectReason::ActionNotClosed);
    }
    if !input.merged {
        reasons.push(RejectReason::NotMerged);
    }

    let loc = u64::try_from(input.additions.max(0)).unwrap_or(0);
    if loc < input.min_loc {
        reasons.push(RejectReason::LocBelowMin {
            actual: loc,
            threshold: input.min_loc,
        });
    }

    // Only enforced when at least one check reported.
    if let Some(status) = input.ci_status {
        if status.total_count > 0 && status.state != CI_SUCCESS {
            reasons.push(RejectReason::CiNotSuccess {
                state: status.state.clone(),
            });
        }
    }

    PolicyDecision {
        accepted: reasons.is_empty(),
        reasons,
        loc,
    }
}
