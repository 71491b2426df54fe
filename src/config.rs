//! Configuration for merge-rewards.

use crate::primitives::{Address, PayoutMode, RewardAmount};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Evidence storage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceProviderKind {
    /// No external pin; always use the local placeholder locator.
    #[default]
    Stub,
    /// Pinata JSON pinning API.
    Pinata,
    /// Web3.Storage upload API.
    #[serde(alias = "web3.storage")]
    Web3Storage,
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Contribution store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Inbound webhook configuration.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Process-wide payout defaults used when a repository has no schema.
    #[serde(default)]
    pub defaults: PayoutDefaults,

    /// GitHub API configuration.
    #[serde(default)]
    pub github: GithubConfig,

    /// Evidence publishing configuration.
    #[serde(default)]
    pub evidence: EvidenceConfig,

    /// Ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Background reconciliation configuration.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Administrative endpoint configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

/// Contribution store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Inbound webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for `X-Hub-Signature-256` verification.
    #[serde(default)]
    pub secret: Option<String>,

    /// Allow unsigned deliveries for local development.
    #[serde(default)]
    pub allow_dev_bypass: bool,
}

/// Process-wide payout defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutDefaults {
    /// Minimum lines of code (additions) for a PR to qualify.
    #[serde(default = "default_min_loc")]
    pub min_loc: u64,

    /// Payout mode.
    #[serde(default)]
    pub payout_mode: PayoutMode,

    /// Reward in the payout asset's smallest unit.
    #[serde(default)]
    pub reward: RewardAmount,

    /// Token address for ERC-20 payouts.
    #[serde(default)]
    pub token_address: Option<Address>,
}

/// GitHub API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API base URL.
    #[serde(default = "default_github_api")]
    pub api_base: String,

    /// Optional API token.
    #[serde(default)]
    pub token: Option<String>,

    /// Query the combined commit status during policy evaluation.
    #[serde(default = "default_true")]
    pub check_ci: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Evidence publishing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Provider to pin evidence with.
    #[serde(default)]
    pub provider: EvidenceProviderKind,

    /// Override for the provider's API base URL.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Pinata JWT.
    #[serde(default)]
    pub pinata_jwt: Option<String>,

    /// Web3.Storage API token.
    #[serde(default)]
    pub web3storage_token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Enable on-chain registration.
    #[serde(default)]
    pub enabled: bool,

    /// JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Contribution registry contract address (`0x` + 40 hex). A malformed
    /// value leaves the registrar inert.
    #[serde(default)]
    pub registry_address: Option<String>,

    /// Account the RPC endpoint signs registrations with.
    #[serde(default)]
    pub registrar_address: Option<String>,

    /// Timeout for a single JSON-RPC request in seconds.
    #[serde(default = "default_http_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum time to wait for a transaction receipt in seconds.
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    /// Receipt polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Background reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Interval between reconciliation passes (0 disables the loop).
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Maximum contributions examined per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Administrative endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for `/admin` endpoints (endpoints are disabled when unset).
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            webhook: WebhookConfig::default(),
            defaults: PayoutDefaults::default(),
            github: GithubConfig::default(),
            evidence: EvidenceConfig::default(),
            ledger: LedgerConfig::default(),
            reconcile: ReconcileConfig::default(),
            admin: AdminConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for PayoutDefaults {
    fn default() -> Self {
        Self {
            min_loc: default_min_loc(),
            payout_mode: PayoutMode::default(),
            reward: RewardAmount::zero(),
            token_address: None,
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            token: None,
            check_ci: true,
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            provider: EvidenceProviderKind::default(),
            endpoint: None,
            pinata_jwt: None,
            web3storage_token: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: None,
            registry_address: None,
            registrar_address: None,
            request_timeout_secs: default_http_timeout(),
            receipt_timeout_secs: default_receipt_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "merge-rewards")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".merge-rewards"))
}

fn default_db_path() -> PathBuf {
    default_data_dir().join("contributions.db")
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_min_loc() -> u64 {
    5
}

const fn default_http_timeout() -> u64 {
    10
}

const fn default_receipt_timeout() -> u64 {
    120
}

const fn default_poll_interval() -> u64 {
    1_000
}

const fn default_reconcile_interval() -> u64 {
    300 // 5 minutes
}

const fn default_batch_size() -> usize {
    50
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if the default payout mode is ERC-20 without a token.
    pub fn validate(&self) -> crate::Result<()> {
        if self.defaults.payout_mode == PayoutMode::Erc20
            && self.defaults.token_address.map_or(true, |a| a.is_zero())
        {
            return Err(crate::Error::Config(
                "defaults.token_address is required when defaults.payout_mode = \"ERC20\""
                    .to_string(),
            ));
        }
        Ok(())
    }
}
