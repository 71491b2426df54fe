//! SQLite-backed contribution store.
//!
//! A single connection guarded by a mutex; every call runs on the blocking
//! pool. Writes are conflict-safe SQL so concurrent handlers racing on the
//! same id can never overwrite each other.

use super::schema;
use super::{Contribution, RepoSchema};
use crate::error::{Error, Result};
use crate::primitives::{Address, ContributionId, TxHash};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const CONTRIBUTION_COLUMNS: &str = "id, repo, commit_hash, beneficiary, evidence_uri, reward, \
     payout_mode, token_address, registrar, ledger_tx_hash, claimed, claim_tx_hash, \
     author_handle, pr_number, registered_at";

/// Contribution store.
#[derive(Clone)]
pub struct ContributionStore {
    conn: Arc<Mutex<Connection>>,
}

impl ContributionStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening contribution store at {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;
        Self::init(conn)
    }

    /// Open an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory contribution store");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    async fn run<F, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("{op}: blocking task failed: {e}")))?
    }

    /// Insert `contribution` unless a row with its id exists.
    ///
    /// Returns `true` if this call created the row. An existing row is never
    /// modified.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn insert_if_absent(&self, contribution: &Contribution) -> Result<bool> {
        let c = contribution.clone();
        self.run("insert_if_absent", move |conn| {
            let changed = conn.execute(
                &format!(
                    "INSERT INTO contributions ({CONTRIBUTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(id) DO NOTHING"
                ),
                params![
                    c.id.to_hex(),
                    c.repo,
                    c.commit_hash.to_hex(),
                    c.beneficiary.to_checksum(),
                    c.evidence_uri,
                    c.reward.as_str(),
                    c.payout_mode.as_str(),
                    c.token_address.map(|a| a.to_checksum()),
                    c.registrar.map(|a| a.to_checksum()),
                    c.ledger_tx_hash.map(|h| h.to_hex()),
                    c.claimed,
                    c.claim_tx_hash.map(|h| h.to_hex()),
                    c.author_handle,
                    c.pr_number.and_then(|n| i64::try_from(n).ok()),
                    c.registered_at.timestamp_millis(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Look up a contribution by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the row is corrupt.
    pub async fn find_by_id(&self, id: &ContributionId) -> Result<Option<Contribution>> {
        let id = id.to_hex();
        self.run("find_by_id", move |conn| {
            conn.query_row(
                &format!("SELECT {CONTRIBUTION_COLUMNS} FROM contributions WHERE id = ?1"),
                params![id],
                ContributionRow::from_row,
            )
            .optional()?
            .map(ContributionRow::into_contribution)
            .transpose()
        })
        .await
    }

    /// Contributions payable to `beneficiary`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is corrupt.
    pub async fn find_by_beneficiary(
        &self,
        beneficiary: &Address,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        let beneficiary = beneficiary.to_checksum();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run("find_by_beneficiary", move |conn| {
            query_contributions(
                conn,
                &format!(
                    "SELECT {CONTRIBUTION_COLUMNS} FROM contributions
                     WHERE beneficiary = ?1
                     ORDER BY registered_at DESC, rowid DESC
                     LIMIT ?2"
                ),
                params![beneficiary, limit],
            )
        })
        .await
    }

    /// Unclaimed contributions payable to `beneficiary`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is corrupt.
    pub async fn unclaimed_by_beneficiary(&self, beneficiary: &Address) -> Result<Vec<Contribution>> {
        let beneficiary = beneficiary.to_checksum();
        self.run("unclaimed_by_beneficiary", move |conn| {
            query_contributions(
                conn,
                &format!(
                    "SELECT {CONTRIBUTION_COLUMNS} FROM contributions
                     WHERE beneficiary = ?1 AND claimed = 0
                     ORDER BY registered_at ASC, rowid ASC"
                ),
                params![beneficiary],
            )
        })
        .await
    }

    /// Record the registration transaction for `id`.
    ///
    /// Only fills an empty slot; returns `true` if the transaction was
    /// attached by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn attach_ledger_tx(&self, id: &ContributionId, tx_hash: &TxHash) -> Result<bool> {
        let id = id.to_hex();
        let tx_hash = tx_hash.to_hex();
        self.run("attach_ledger_tx", move |conn| {
            let changed = conn.execute(
                "UPDATE contributions SET ledger_tx_hash = ?2
                 WHERE id = ?1 AND ledger_tx_hash IS NULL",
                params![id, tx_hash],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Mark `id` claimed, recording the claim transaction if one is given and
    /// none is stored yet.
    ///
    /// Returns `true` if the row flipped from unclaimed to claimed in this
    /// call. A claimed row is never unclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn mark_claimed(&self, id: &ContributionId, claim_tx: Option<TxHash>) -> Result<bool> {
        let id = id.to_hex();
        let claim_tx = claim_tx.map(|h| h.to_hex());
        self.run("mark_claimed", move |conn| {
            let tx = conn.transaction()?;
            let was_claimed: Option<bool> = tx
                .query_row(
                    "SELECT claimed FROM contributions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(was_claimed) = was_claimed else {
                return Ok(false);
            };
            tx.execute(
                "UPDATE contributions
                 SET claimed = 1, claim_tx_hash = COALESCE(claim_tx_hash, ?2)
                 WHERE id = ?1",
                params![id, claim_tx],
            )?;
            tx.commit()?;
            Ok(!was_claimed)
        })
        .await
    }

    /// Contributions without a registration transaction.
    ///
    /// Rows never tried by backfill come first (oldest first), then the
    /// least recently tried, so rows that keep failing cannot crowd out the
    /// rest of the pending set.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is corrupt.
    pub async fn pending_ledger(&self, limit: usize) -> Result<Vec<Contribution>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run("pending_ledger", move |conn| {
            query_contributions(
                conn,
                &format!(
                    "SELECT {CONTRIBUTION_COLUMNS} FROM contributions
                     WHERE ledger_tx_hash IS NULL
                     ORDER BY backfill_attempt IS NOT NULL, backfill_attempt ASC,
                              registered_at ASC, rowid ASC
                     LIMIT ?1"
                ),
                params![limit],
            )
        })
        .await
    }

    /// Record a backfill attempt on `id`, moving it behind every other
    /// pending row. Contribution fields are not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn note_backfill_attempt(&self, id: &ContributionId) -> Result<()> {
        let id = id.to_hex();
        self.run("note_backfill_attempt", move |conn| {
            conn.execute(
                "UPDATE contributions
                 SET backfill_attempt =
                     (SELECT COALESCE(MAX(backfill_attempt), 0) + 1 FROM contributions)
                 WHERE id = ?1 AND ledger_tx_hash IS NULL",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    /// Distinct beneficiaries with at least one unclaimed contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is corrupt.
    pub async fn unclaimed_beneficiaries(&self) -> Result<Vec<Address>> {
        self.run("unclaimed_beneficiaries", |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT beneficiary FROM contributions
                 WHERE claimed = 0 ORDER BY beneficiary",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.map(|row| parse_column(&row?))
                .collect::<Result<Vec<Address>>>()
        })
        .await
    }

    /// Schema for `repo` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the row is corrupt.
    pub async fn get_repo_schema(&self, repo: &str) -> Result<Option<RepoSchema>> {
        let repo = repo.trim().to_string();
        self.run("get_repo_schema", move |conn| {
            conn.query_row(
                "SELECT repo, min_loc, payout_mode, reward, token_address, updated_by, updated_at
                 FROM repo_schemas WHERE repo = ?1",
                params![repo],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?
            .map(
                |(repo, min_loc, payout_mode, reward, token, updated_by, updated_at)| {
                    Ok(RepoSchema {
                        repo,
                        min_loc: u64::try_from(min_loc).unwrap_or(0),
                        payout_mode: parse_column(&payout_mode)?,
                        reward: parse_column(&reward)?,
                        token_address: token.as_deref().map(parse_column).transpose()?,
                        updated_by,
                        updated_at: from_millis(updated_at)?,
                    })
                },
            )
            .transpose()
        })
        .await
    }

    /// Create or replace the schema for `schema.repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_repo_schema(&self, schema: &RepoSchema) -> Result<()> {
        let s = schema.clone();
        self.run("upsert_repo_schema", move |conn| {
            conn.execute(
                "INSERT INTO repo_schemas
                     (repo, min_loc, payout_mode, reward, token_address, updated_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(repo) DO UPDATE SET
                     min_loc = excluded.min_loc,
                     payout_mode = excluded.payout_mode,
                     reward = excluded.reward,
                     token_address = excluded.token_address,
                     updated_by = excluded.updated_by,
                     updated_at = excluded.updated_at",
                params![
                    s.repo,
                    i64::try_from(s.min_loc).unwrap_or(i64::MAX),
                    s.payout_mode.as_str(),
                    s.reward.as_str(),
                    s.token_address.map(|a| a.to_checksum()),
                    s.updated_by,
                    s.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Bind `handle` to `address`, replacing any binding of either side.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn bind_identity(&self, handle: &str, address: &Address) -> Result<()> {
        let handle = handle.trim().to_string();
        let address = address.to_checksum();
        self.run("bind_identity", move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM identity_bindings WHERE handle = ?1 OR address = ?2",
                params![handle, address],
            )?;
            tx.execute(
                "INSERT INTO identity_bindings (handle, address, bound_at) VALUES (?1, ?2, ?3)",
                params![handle, address, Utc::now().timestamp_millis()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Address bound to `handle` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the row is corrupt.
    pub async fn resolve_identity(&self, handle: &str) -> Result<Option<Address>> {
        let handle = handle.trim().to_string();
        self.run("resolve_identity", move |conn| {
            conn.query_row(
                "SELECT address FROM identity_bindings WHERE handle = ?1",
                params![handle],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .as_deref()
            .map(parse_column)
            .transpose()
        })
        .await
    }
}

fn query_contributions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Contribution>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ContributionRow::from_row)?;
    rows.map(|row| row?.into_contribution()).collect()
}

fn parse_column<T: FromStr<Err = Error>>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|e| Error::Storage(format!("corrupt column value {value:?}: {e}")))
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Storage(format!("corrupt timestamp: {millis}")))
}

/// Raw column values of a `contributions` row.
struct ContributionRow {
    id: String,
    repo: String,
    commit_hash: String,
    beneficiary: String,
    evidence_uri: String,
    reward: String,
    payout_mode: String,
    token_address: Option<String>,
    registrar: Option<String>,
    ledger_tx_hash: Option<String>,
    claimed: bool,
    claim_tx_hash: Option<String>,
    author_handle: Option<String>,
    pr_number: Option<i64>,
    registered_at: i64,
}

impl ContributionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repo: row.get(1)?,
            commit_hash: row.get(2)?,
            beneficiary: row.get(3)?,
            evidence_uri: row.get(4)?,
            reward: row.get(5)?,
            payout_mode: row.get(6)?,
            token_address: row.get(7)?,
            registrar: row.get(8)?,
            ledger_tx_hash: row.get(9)?,
            claimed: row.get(10)?,
            claim_tx_hash: row.get(11)?,
            author_handle: row.get(12)?,
            pr_number: row.get(13)?,
            registered_at: row.get(14)?,
        })
    }

    fn into_contribution(self) -> Result<Contribution> {
        Ok(Contribution {
            id: parse_column(&self.id)?,
            repo: self.repo,
            commit_hash: parse_column(&self.commit_hash)?,
            beneficiary: parse_column(&self.beneficiary)?,
            evidence_uri: self.evidence_uri,
            reward: parse_column(&self.reward)?,
            payout_mode: parse_column(&self.payout_mode)?,
            token_address: self.token_address.as_deref().map(parse_column).transpose()?,
            registrar: self.registrar.as_deref().map(parse_column).transpose()?,
            ledger_tx_hash: self.ledger_tx_hash.as_deref().map(parse_column).transpose()?,
            claimed: self.claimed,
            claim_tx_hash: self.claim_tx_hash.as_deref().map(parse_column).transpose()?,
            author_handle: self.author_handle,
            pr_number: self.pr_number.and_then(|n| u64::try_from(n).ok()),
            registered_at: from_millis(self.registered_at)?,
        })
    }
}
