//! Store schema and forward-only migrations.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 3;

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let current: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(Error::Storage(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating store schema from v{current} to v{SCHEMA_VERSION}");

    if current < 1 {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS contributions (
                id TEXT PRIMARY KEY NOT NULL,
                repo TEXT NOT NULL,
                commit_hash TEXT NOT NULL,
                beneficiary TEXT NOT NULL,
                evidence_uri TEXT NOT NULL,
                reward TEXT NOT NULL,
                payout_mode TEXT NOT NULL,
                token_address TEXT,
                registrar TEXT,
                ledger_tx_hash TEXT,
                claimed INTEGER NOT NULL DEFAULT 0,
                author_handle TEXT,
                registered_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contributions_beneficiary
                ON contributions(beneficiary, registered_at);
            CREATE INDEX IF NOT EXISTS idx_contributions_pending
                ON contributions(registered_at) WHERE ledger_tx_hash IS NULL;

            CREATE TABLE IF NOT EXISTS repo_schemas (
                repo TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
                min_loc INTEGER NOT NULL,
                payout_mode TEXT NOT NULL,
                reward TEXT NOT NULL,
                token_address TEXT,
                updated_by TEXT,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS identity_bindings (
                handle TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
                address TEXT NOT NULL UNIQUE,
                bound_at INTEGER NOT NULL
            );
            ",
        )?;
    }

    // v2: claim callback transaction and PR number.
    if current < 2 {
        conn.execute_batch(
            r"
            ALTER TABLE contributions ADD COLUMN claim_tx_hash TEXT;
            ALTER TABLE contributions ADD COLUMN pr_number INTEGER;
            CREATE INDEX IF NOT EXISTS idx_contributions_unclaimed
                ON contributions(beneficiary) WHERE claimed = 0;
            ",
        )?;
    }

    // v3: backfill rotation. Holds the sequence number of the last attempt.
    if current < 3 {
        conn.execute_batch(
            r"
            ALTER TABLE contributions ADD COLUMN backfill_attempt INTEGER;
            ",
        )?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}
