//! Per-event registration flow.
//!
//! ```text
//! PullRequestEvent
//!        │
//!        ▼
//! ┌──────────────┐  reject   ┌──────────────────┐
//! │    Policy    │─────────▶│  PolicyRejected  │
//! └──────┬───────┘           └──────────────────┘
//!        │ accept
//!        ▼
//! ┌──────────────┐  none     ┌──────────────────┐
//! │   Identity   │─────────▶│     Unbound      │
//! └──────┬───────┘           └──────────────────┘
//!        │ bound
//!        ▼
//!  id already stored? ── yes ──▶ Registered (stored row)
//!        │ no
//!        ▼
//! Evidence ─▶ Ledger (best-effort) ─▶ Store (authoritative)
//! ```
//!
//! Only store failures are fatal. CI lookups degrade to "no information",
//! evidence falls back to a placeholder and ledger failures leave the row for
//! backfill.

use crate::config::PayoutDefaults;
use crate::error::{Error, Result};
use crate::event::{PipelineEvent, PipelineEventsSender};
use crate::evidence::{Evidence, EvidenceMetadata, EvidencePublisher, PolicySnapshot};
use crate::github::CommitStatusSource;
use crate::identity::{IdentityResolver, Resolution};
use crate::ledger::{commit_digest, compute_id, LedgerRegistrar, RegistrationCall};
use crate::policy::{self, CiStatus, PolicyDecision, PolicyInput};
use crate::primitives::{Address, ContributionId, PayoutMode, RewardAmount, TxHash};
use crate::store::{Contribution, ContributionStore, RepoSchema};
use crate::webhook::PullRequestEvent;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payout terms in effect for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutTerms {
    /// Minimum lines of code.
    pub min_loc: u64,
    /// Payout mode.
    pub payout_mode: PayoutMode,
    /// Reward in the payout asset's smallest unit.
    pub reward: RewardAmount,
    /// Token for ERC-20 payouts.
    pub token_address: Option<Address>,
}

impl PayoutTerms {
    /// Token recorded with a contribution; never set for native payouts.
    #[must_use]
    pub fn stored_token(&self) -> Option<Address> {
        match self.payout_mode {
            PayoutMode::Native => None,
            PayoutMode::Erc20 => self.token_address.filter(|a| !a.is_zero()),
        }
    }
}

impl From<&RepoSchema> for PayoutTerms {
    fn from(schema: &RepoSchema) -> Self {
        Self {
            min_loc: schema.min_loc,
            payout_mode: schema.payout_mode,
            reward: schema.reward.clone(),
            token_address: schema.token_address,
        }
    }
}

impl From<&PayoutDefaults> for PayoutTerms {
    fn from(defaults: &PayoutDefaults) -> Self {
        Self {
            min_loc: defaults.min_loc,
            payout_mode: defaults.payout_mode,
            reward: defaults.reward.clone(),
            token_address: defaults.token_address,
        }
    }
}

/// Result of processing one event.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The pull request does not qualify.
    PolicyRejected(PolicyDecision),
    /// The author has no bound payable address.
    Unbound {
        /// Author handle from the event.
        author: Option<String>,
    },
    /// The contribution is recorded.
    Registered {
        /// The stored row.
        contribution: Contribution,
        /// Whether this event created the row.
        created: bool,
    },
}

/// The registration pipeline.
#[derive(Clone)]
pub struct Pipeline {
    store: ContributionStore,
    identity: IdentityResolver,
    evidence: Arc<EvidencePublisher>,
    registrar: LedgerRegistrar,
    ci: Option<Arc<dyn CommitStatusSource>>,
    defaults: PayoutDefaults,
    events_tx: PipelineEventsSender,
}

impl Pipeline {
    /// Assemble a pipeline. `ci` is `None` when CI checks are disabled.
    #[must_use]
    pub fn new(
        store: ContributionStore,
        evidence: Arc<EvidencePublisher>,
        registrar: LedgerRegistrar,
        ci: Option<Arc<dyn CommitStatusSource>>,
        defaults: PayoutDefaults,
        events_tx: PipelineEventsSender,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone()),
            store,
            evidence,
            registrar,
            ci,
            defaults,
            events_tx,
        }
    }

    /// The store the pipeline writes to.
    #[must_use]
    pub fn store(&self) -> &ContributionStore {
        &self.store
    }

    /// The identity resolver.
    #[must_use]
    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// The ledger registrar.
    #[must_use]
    pub fn registrar(&self) -> &LedgerRegistrar {
        &self.registrar
    }

    /// Payout terms for `repo`: its schema if one exists, else the defaults.
    /// A schema that cannot be read also yields the defaults.
    pub async fn payout_terms(&self, repo: &str) -> PayoutTerms {
        match self.store.get_repo_schema(repo).await {
            Ok(Some(schema)) => PayoutTerms::from(&schema),
            Ok(None) => PayoutTerms::from(&self.defaults),
            Err(e) => {
                warn!("Repo schema lookup for {repo} failed, using defaults: {e}");
                PayoutTerms::from(&self.defaults)
            }
        }
    }

    async fn ci_status(&self, event: &PullRequestEvent) -> Option<CiStatus> {
        let ci = self.ci.as_ref()?;
        match ci.combined_status(&event.repo, &event.commit_sha).await {
            Ok(status) => status,
            Err(e) => {
                debug!("CI status unavailable for {}@{}: {e}", event.repo, event.commit_sha);
                None
            }
        }
    }

    /// Process one validated pull-request event.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails; every other failure is
    /// absorbed.
    pub async fn process(&self, event: &PullRequestEvent) -> Result<Outcome> {
        let terms = self.payout_terms(&event.repo).await;
        let ci_status = self.ci_status(event).await;

        let decision = policy::evaluate(&PolicyInput {
            action: &event.action,
            merged: event.merged,
            additions: event.additions,
            ci_status: ci_status.as_ref(),
            min_loc: terms.min_loc,
        });
        if !decision.accepted {
            let reasons = decision.reason_codes();
            info!(
                "Policy rejected {}#{}: {}",
                event.repo,
                event.pr_number,
                reasons.join(",")
            );
            let _ = self.events_tx.send(PipelineEvent::PolicyRejected {
                repo: event.repo.clone(),
                pr_number: event.pr_number,
                reasons,
            });
            return Ok(Outcome::PolicyRejected(decision));
        }

        let beneficiary = match self.identity.resolve(event.author.as_deref()).await? {
            Resolution::Bound(address) => address,
            Resolution::Unbound => {
                info!(
                    "No bound wallet for {:?} on {}#{}",
                    event.author, event.repo, event.pr_number
                );
                let _ = self.events_tx.send(PipelineEvent::AuthorUnbound {
                    repo: event.repo.clone(),
                    author: event.author.clone(),
                });
                return Ok(Outcome::Unbound {
                    author: event.author.clone(),
                });
            }
        };

        let commit_hash = commit_digest(&event.commit_sha);
        let id = compute_id(&event.repo, &commit_hash);

        // Duplicate delivery: answer from the stored row, no new side effects.
        if let Some(existing) = self.store.find_by_id(&id).await? {
            debug!("Contribution {id} already recorded");
            return Ok(Outcome::Registered {
                contribution: existing,
                created: false,
            });
        }

        if terms.payout_mode == PayoutMode::Erc20 && terms.stored_token().is_none() {
            return Err(Error::Config(format!(
                "ERC20 payout for {} has no token address",
                event.repo
            )));
        }

        let evidence_uri = self
            .evidence
            .publish(&Evidence {
                repo: event.repo.clone(),
                commit_hash: event.commit_sha.clone(),
                author: event.author.clone(),
                pr_number: event.pr_number,
                metadata: EvidenceMetadata {
                    additions: event.additions,
                    deletions: event.deletions,
                    policy: PolicySnapshot {
                        loc: decision.loc,
                        min_loc: terms.min_loc,
                    },
                },
            })
            .await;

        let call = RegistrationCall {
            id,
            beneficiary,
            repo: event.repo.clone(),
            commit_hash,
            evidence_uri: evidence_uri.clone(),
            reward: terms.reward.clone(),
            payout_mode: terms.payout_mode,
            token: terms.stored_token().unwrap_or(Address::ZERO),
        };
        let tx_hash = self.submit(&call).await;

        let contribution = Contribution {
            id,
            repo: event.repo.clone(),
            commit_hash,
            beneficiary,
            evidence_uri,
            reward: terms.reward.clone(),
            payout_mode: terms.payout_mode,
            token_address: terms.stored_token(),
            registrar: self.registrar.registrar_address(),
            ledger_tx_hash: tx_hash,
            claimed: false,
            claim_tx_hash: None,
            author_handle: event.author.clone(),
            pr_number: Some(event.pr_number),
            registered_at: Utc::now(),
        };

        if self.store.insert_if_absent(&contribution).await? {
            info!(
                "Accepted {}#{} as {id} (beneficiary={beneficiary}, payout={}, reward={}, tx={})",
                event.repo,
                event.pr_number,
                terms.payout_mode,
                terms.reward,
                tx_hash.map_or_else(|| "n/a".to_string(), |tx| tx.to_hex())
            );
            let _ = self.events_tx.send(PipelineEvent::ContributionRegistered {
                id,
                beneficiary,
                on_chain: tx_hash.is_some(),
            });
            return Ok(Outcome::Registered {
                contribution,
                created: true,
            });
        }

        // Lost a race with a concurrent delivery of the same id.
        debug!("Concurrent insert won for {id}");
        if let Some(tx_hash) = tx_hash {
            self.attach(&id, &tx_hash).await?;
        }
        let stored = self.store.find_by_id(&id).await?.ok_or_else(|| {
            Error::Storage(format!("contribution {id} missing after conflicting insert"))
        })?;
        Ok(Outcome::Registered {
            contribution: stored,
            created: false,
        })
    }

    /// Best-effort ledger write; failures are reported and absorbed.
    pub(crate) async fn submit(&self, call: &RegistrationCall) -> Option<TxHash> {
        match self.registrar.register(call).await {
            Ok(write) => write.tx_hash(),
            Err(e) => {
                warn!("Deferring ledger registration of {} to backfill: {e}", call.id);
                let _ = self.events_tx.send(PipelineEvent::LedgerWriteFailed {
                    id: call.id,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Attach `tx_hash` to `id` if the row has none yet.
    pub(crate) async fn attach(&self, id: &ContributionId, tx_hash: &TxHash) -> Result<bool> {
        let attached = self.store.attach_ledger_tx(id, tx_hash).await?;
        if attached {
            let _ = self.events_tx.send(PipelineEvent::LedgerAttached {
                id: *id,
                tx_hash: *tx_hash,
            });
        }
        Ok(attached)
    }

    pub(crate) fn events(&self) -> &PipelineEventsSender {
        &self.events_tx
    }
}
