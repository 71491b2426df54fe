//! Pull-based reconciliation between the store and the ledger.
//!
//! The store learns about ledger state only by asking. Three jobs do the
//! asking:
//!
//! - **backfill** submits stored contributions that never reached the ledger
//! - **claim sync** folds on-ledger claims back into the store
//! - **claim confirmation** checks a single claim reported by a client
//!
//! All three require an active registrar and only ever move rows forward:
//! a transaction is only attached to an empty slot and `claimed` is never
//! cleared.

use crate::error::{Error, Result};
use crate::event::PipelineEvent;
use crate::ledger::{LedgerWrite, RegistrationCall};
use crate::pipeline::Pipeline;
use crate::primitives::{Address, ContributionId, TxHash};
use crate::store::Contribution;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Per-contribution result of a backfill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// Registered now; the transaction was attached.
    Attached {
        /// Registration transaction.
        #[serde(rename = "txHash")]
        tx_hash: TxHash,
    },
    /// The ledger already knows the id; the row was left untouched.
    AlreadyOnLedger,
    /// The attempt failed and will be retried next pass.
    Failed {
        /// Failure description.
        error: String,
    },
}

/// Backfill result for one contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillEntry {
    /// Contribution id.
    pub id: ContributionId,
    /// What happened.
    #[serde(flatten)]
    pub outcome: BackfillOutcome,
}

/// Result of a backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Rows examined.
    pub examined: usize,
    /// Transactions attached.
    pub attached: usize,
    /// Per-row results.
    pub results: Vec<BackfillEntry>,
}

/// Per-contribution result of a claim sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimSyncOutcome {
    /// Claimed on the ledger; the row was marked claimed.
    Claimed,
    /// Still unclaimed on the ledger.
    Unclaimed,
    /// The ledger could not be read.
    Failed {
        /// Failure description.
        error: String,
    },
}

/// Claim sync result for one contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimSyncEntry {
    /// Contribution id.
    pub id: ContributionId,
    /// What happened.
    #[serde(flatten)]
    pub outcome: ClaimSyncOutcome,
}

/// Result of a claim sync for one beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimSyncReport {
    /// Beneficiary that was synced.
    pub beneficiary: Address,
    /// Unclaimed rows checked.
    pub checked: usize,
    /// Rows newly marked claimed.
    pub claimed: usize,
    /// Per-row results.
    pub results: Vec<ClaimSyncEntry>,
}

/// Result of a claim confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimConfirmation {
    /// The ledger reports the contribution claimed; the row is marked.
    Claimed,
    /// The ledger does not report a claim; nothing changed.
    NotClaimed,
}

/// Totals of a full reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Transactions attached by backfill.
    pub attached: usize,
    /// Claims folded back.
    pub claimed: usize,
}

/// Runs reconciliation jobs over a pipeline's store and registrar.
#[derive(Clone)]
pub struct Reconciler {
    pipeline: Pipeline,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Whether the jobs can run.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pipeline.registrar().is_enabled()
    }

    fn require_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::Ledger("ledger registrar is inactive".to_string()))
        }
    }

    /// Submit up to `limit` contributions that have no registration
    /// transaction. Rows are taken least recently tried first, so repeated
    /// passes cover the whole pending set.
    ///
    /// # Errors
    ///
    /// Returns an error if the registrar is inactive or the store fails.
    /// Per-row ledger failures are reported in the results.
    pub async fn backfill(&self, limit: usize) -> Result<BackfillReport> {
        self.require_active()?;
        let pending = self.pipeline.store().pending_ledger(limit).await?;
        let mut report = BackfillReport {
            examined: pending.len(),
            ..BackfillReport::default()
        };

        for contribution in pending {
            let outcome = self.backfill_one(&contribution).await?;
            if matches!(outcome, BackfillOutcome::Attached { .. }) {
                report.attached += 1;
            } else {
                self.pipeline
                    .store()
                    .note_backfill_attempt(&contribution.id)
                    .await?;
            }
            report.results.push(BackfillEntry {
                id: contribution.id,
                outcome,
            });
        }

        if report.examined > 0 {
            info!(
                "Backfill examined {} contributions, attached {}",
                report.examined, report.attached
            );
        }
        Ok(report)
    }

    async fn backfill_one(&self, contribution: &Contribution) -> Result<BackfillOutcome> {
        let registrar = self.pipeline.registrar();
        match registrar.status(&contribution.id).await {
            Ok(Some(status)) if status.registered => {
                debug!("{} already on ledger, leaving row untouched", contribution.id);
                return Ok(BackfillOutcome::AlreadyOnLedger);
            }
            Ok(_) => {}
            Err(e) => {
                return Ok(BackfillOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }

        let call = RegistrationCall {
            id: contribution.id,
            beneficiary: contribution.beneficiary,
            repo: contribution.repo.clone(),
            commit_hash: contribution.commit_hash,
            evidence_uri: contribution.evidence_uri.clone(),
            reward: contribution.reward.clone(),
            payout_mode: contribution.payout_mode,
            token: contribution.token_address.unwrap_or(Address::ZERO),
        };
        match self.pipeline.submit(&call).await {
            Some(tx_hash) => {
                self.pipeline.attach(&contribution.id, &tx_hash).await?;
                Ok(BackfillOutcome::Attached { tx_hash })
            }
            None => Ok(BackfillOutcome::Failed {
                error: "ledger registration failed".to_string(),
            }),
        }
    }

    /// Fold on-ledger claims of `beneficiary`'s contributions into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the registrar is inactive or the store fails.
    pub async fn sync_claims(&self, beneficiary: &Address) -> Result<ClaimSyncReport> {
        self.require_active()?;
        let unclaimed = self
            .pipeline
            .store()
            .unclaimed_by_beneficiary(beneficiary)
            .await?;

        let mut report = ClaimSyncReport {
            beneficiary: *beneficiary,
            checked: unclaimed.len(),
            claimed: 0,
            results: Vec::with_capacity(unclaimed.len()),
        };

        for contribution in unclaimed {
            let outcome = match self.pipeline.registrar().status(&contribution.id).await {
                Ok(Some(status)) if status.claimed => {
                    if self.mark_claimed(&contribution.id, None).await? {
                        report.claimed += 1;
                    }
                    ClaimSyncOutcome::Claimed
                }
                Ok(_) => ClaimSyncOutcome::Unclaimed,
                Err(e) => {
                    warn!("Claim sync for {} failed: {e}", contribution.id);
                    ClaimSyncOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.results.push(ClaimSyncEntry {
                id: contribution.id,
                outcome,
            });
        }
        Ok(report)
    }

    /// Confirm a claim reported for `id`. Only an on-ledger claim marks the
    /// row.
    ///
    /// # Errors
    ///
    /// Returns an error if the registrar is inactive, the ledger cannot be
    /// read or the store fails.
    pub async fn confirm_claim(
        &self,
        id: &ContributionId,
        claim_tx: Option<TxHash>,
    ) -> Result<ClaimConfirmation> {
        self.require_active()?;
        let status = self
            .pipeline
            .registrar()
            .status(id)
            .await?
            .unwrap_or_default();
        if !status.claimed {
            debug!("Claim of {id} not visible on ledger");
            return Ok(ClaimConfirmation::NotClaimed);
        }
        self.mark_claimed(id, claim_tx).await?;
        Ok(ClaimConfirmation::Claimed)
    }

    async fn mark_claimed(&self, id: &ContributionId, claim_tx: Option<TxHash>) -> Result<bool> {
        let flipped = self.pipeline.store().mark_claimed(id, claim_tx).await?;
        if flipped {
            info!("Contribution {id} claimed");
            let _ = self
                .pipeline
                .events()
                .send(PipelineEvent::ClaimConfirmed { id: *id });
        }
        Ok(flipped)
    }

    /// One full pass: backfill up to `batch_size` rows, then sync claims for
    /// every beneficiary with unclaimed rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the registrar is inactive or the store fails.
    pub async fn run_once(&self, batch_size: usize) -> Result<ReconcileSummary> {
        let backfill = self.backfill(batch_size).await?;
        let mut summary = ReconcileSummary {
            attached: backfill.attached,
            claimed: 0,
        };

        for beneficiary in self.pipeline.store().unclaimed_beneficiaries().await? {
            summary.claimed += self.sync_claims(&beneficiary).await?.claimed;
        }

        let _ = self.pipeline.events().send(PipelineEvent::ReconcileComplete {
            attached: summary.attached,
            claimed: summary.claimed,
        });
        Ok(summary)
    }
}
