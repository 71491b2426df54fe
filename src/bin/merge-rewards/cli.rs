//! Command-line interface definition.

use clap::Parser;
use merge_rewards::ServiceConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Registers merged pull requests as payable contributions.
#[derive(Parser, Debug)]
#[command(name = "merge-rewards")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "MERGE_REWARDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    pub init_config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long, short, env = "MERGE_REWARDS_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// SQLite database path.
    #[arg(long, env = "MERGE_REWARDS_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Shared secret for webhook signatures.
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Accept deliveries carrying `X-Dev-Bypass: 1` without a signature.
    #[arg(long, env = "MERGE_REWARDS_ALLOW_DEV_BYPASS")]
    pub allow_dev_bypass: bool,

    /// GitHub API token for commit status lookups.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Skip CI status lookups.
    #[arg(long)]
    pub no_ci_check: bool,

    /// Register contributions on the ledger.
    #[arg(long, env = "MERGE_REWARDS_LEDGER_ENABLED")]
    pub ledger_enabled: bool,

    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "MERGE_REWARDS_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Contribution registry contract address.
    #[arg(long, env = "MERGE_REWARDS_REGISTRY_ADDRESS")]
    pub registry_address: Option<String>,

    /// Account registrations are sent from.
    #[arg(long, env = "MERGE_REWARDS_REGISTRAR_ADDRESS")]
    pub registrar_address: Option<String>,

    /// Bearer token for `/admin` endpoints.
    #[arg(long, env = "MERGE_REWARDS_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Seconds between reconciliation passes (0 disables).
    #[arg(long, env = "MERGE_REWARDS_RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<u64>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long, env = "MERGE_REWARDS_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Convert CLI arguments into a `ServiceConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<ServiceConfig> {
        // Start with default config or load from file
        let mut config = if let Some(ref path) = self.config {
            ServiceConfig::from_file(path)?
        } else {
            ServiceConfig::default()
        };

        // Override with CLI arguments
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(db_path) = self.db_path {
            config.store.path = db_path;
        }
        if self.webhook_secret.is_some() {
            config.webhook.secret = self.webhook_secret;
        }
        if self.allow_dev_bypass {
            config.webhook.allow_dev_bypass = true;
        }
        if self.github_token.is_some() {
            config.github.token = self.github_token;
        }
        if self.no_ci_check {
            config.github.check_ci = false;
        }
        if self.ledger_enabled {
            config.ledger.enabled = true;
        }
        if self.rpc_url.is_some() {
            config.ledger.rpc_url = self.rpc_url;
        }
        if self.registry_address.is_some() {
            config.ledger.registry_address = self.registry_address;
        }
        if self.registrar_address.is_some() {
            config.ledger.registrar_address = self.registrar_address;
        }
        if self.admin_token.is_some() {
            config.admin.token = self.admin_token;
        }
        if let Some(interval) = self.reconcile_interval {
            config.reconcile.interval_secs = interval;
        }
        config.log_level = self.log_level;

        config.validate()?;
        Ok(config)
    }
}
