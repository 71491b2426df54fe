//! Ledger registrar: the pipeline's gate to the registry.
//!
//! The registrar is either active (holding a ledger client) or inert. It is
//! inert when the ledger is disabled, or when any of the RPC endpoint, the
//! registry address or the registrar account is missing or invalid; an inert
//! registrar never touches the network and the pipeline runs off-chain only.

use super::{Ledger, LedgerStatus, RegistrationCall, RpcLedger};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::primitives::{Address, ContributionId, TxHash};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a registration attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// The registrar is inert; nothing was submitted.
    Disabled,
    /// The registration was mined successfully.
    Submitted(TxHash),
}

impl LedgerWrite {
    /// The transaction hash, if one was obtained.
    #[must_use]
    pub fn tx_hash(self) -> Option<TxHash> {
        match self {
            Self::Disabled => None,
            Self::Submitted(tx) => Some(tx),
        }
    }
}

/// A non-zero address from a ledger setting, or `None` (logged) when the
/// setting is missing or malformed.
fn configured_address(name: &str, value: Option<&str>) -> Option<Address> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        warn!("Ledger enabled but {name} is missing - registrar inert");
        return None;
    };
    match raw.parse::<Address>() {
        Ok(address) if !address.is_zero() => Some(address),
        Ok(_) => {
            warn!("Ledger enabled but {name} is the zero address - registrar inert");
            None
        }
        Err(e) => {
            warn!("Ledger enabled but {name} {raw:?} is invalid ({e}) - registrar inert");
            None
        }
    }
}

/// Submits registrations and reads registry state, with bounded waits.
#[derive(Clone)]
pub struct LedgerRegistrar {
    ledger: Option<Arc<dyn Ledger>>,
    register_timeout: Duration,
    query_timeout: Duration,
}

impl LedgerRegistrar {
    /// Build a registrar from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built. Missing or
    /// invalid settings make the registrar inert rather than failing.
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let query_timeout = Duration::from_secs(config.request_timeout_secs);
        let register_timeout =
            Duration::from_secs(config.receipt_timeout_secs) + query_timeout * 2;

        if !config.enabled {
            info!("Ledger disabled - contributions are recorded off-chain only");
            return Ok(Self::disabled());
        }

        let Some(rpc_url) = config
            .rpc_url
            .as_deref()
            .map(str::trim)
            .filter(|url| reqwest::Url::parse(url).is_ok())
        else {
            warn!("Ledger enabled but rpc_url is missing or invalid - registrar inert");
            return Ok(Self::disabled());
        };
        let registry_setting = config.registry_address.as_deref();
        let Some(registry) = configured_address("registry_address", registry_setting) else {
            return Ok(Self::disabled());
        };
        let registrar_setting = config.registrar_address.as_deref();
        let Some(registrar) = configured_address("registrar_address", registrar_setting) else {
            return Ok(Self::disabled());
        };

        let ledger = RpcLedger::new(
            rpc_url,
            registry,
            registrar,
            query_timeout,
            Duration::from_secs(config.receipt_timeout_secs),
            Duration::from_millis(config.poll_interval_ms),
        )?;

        info!("Ledger registrar active (registry={registry}, registrar={registrar})");
        Ok(Self {
            ledger: Some(Arc::new(ledger)),
            register_timeout,
            query_timeout,
        })
    }

    /// An inert registrar.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            ledger: None,
            register_timeout: Duration::ZERO,
            query_timeout: Duration::ZERO,
        }
    }

    /// An active registrar over `ledger`, bounding every call by `timeout`.
    #[must_use]
    pub fn with_ledger(ledger: Arc<dyn Ledger>, timeout: Duration) -> Self {
        Self {
            ledger: Some(ledger),
            register_timeout: timeout,
            query_timeout: timeout,
        }
    }

    /// Check if the registrar is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.ledger.is_some()
    }

    /// The signing account, when active.
    #[must_use]
    pub fn registrar_address(&self) -> Option<Address> {
        self.ledger.as_ref().map(|l| l.registrar_address())
    }

    /// Submit `call` to the registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Ledger` on any ledger failure or timeout. Callers
    /// absorb these; the contribution is retried by backfill.
    pub async fn register(&self, call: &RegistrationCall) -> Result<LedgerWrite> {
        let Some(ledger) = &self.ledger else {
            debug!("Registrar inert, skipping ledger write for {}", call.id);
            return Ok(LedgerWrite::Disabled);
        };

        match tokio::time::timeout(self.register_timeout, ledger.register_contribution(call)).await
        {
            Ok(Ok(tx_hash)) => Ok(LedgerWrite::Submitted(tx_hash)),
            Ok(Err(e)) => {
                warn!("Ledger registration of {} failed: {e}", call.id);
                Err(e)
            }
            Err(_) => {
                warn!("Ledger registration of {} timed out", call.id);
                Err(Error::Ledger(format!(
                    "registration timed out after {:?}",
                    self.register_timeout
                )))
            }
        }
    }

    /// Read the registry state of `id`. `Ok(None)` when inert.
    ///
    /// # Errors
    ///
    /// Returns `Error::Ledger` if the query fails or times out.
    pub async fn status(&self, id: &ContributionId) -> Result<Option<LedgerStatus>> {
        let Some(ledger) = &self.ledger else {
            return Ok(None);
        };

        match tokio::time::timeout(self.query_timeout, ledger.contribution_status(id)).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Ledger(format!(
                "status query timed out after {:?}",
                self.query_timeout
            ))),
        }
    }
}
