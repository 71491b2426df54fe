//! Ethereum JSON-RPC ledger client.
//!
//! Registrations are sent with `eth_sendTransaction` from the registrar
//! account; the RPC endpoint (a node with an unlocked account, or a signing
//! proxy in front of one) owns the key. Status reads use `eth_call`.

use super::{abi, Ledger, LedgerStatus, RegistrationCall};
use crate::error::{Error, Result};
use crate::primitives::{Address, ContributionId, TxHash};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receipt status of a successful transaction.
const RECEIPT_SUCCESS: &str = "0x1";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    status: Option<String>,
}

/// Contribution registry reached over JSON-RPC.
pub struct RpcLedger {
    http: reqwest::Client,
    rpc_url: String,
    registry: Address,
    registrar: Address,
    receipt_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedger {
    /// Create a client for `registry` at `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        rpc_url: &str,
        registry: Address,
        registrar: Address,
        request_timeout: Duration,
        receipt_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            registry,
            registrar,
            receipt_timeout,
            poll_interval,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Ledger(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Ledger(format!("{method}: HTTP {status}")));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Ledger(format!("{method}: malformed response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(Error::Ledger(format!(
                "{method}: {} (code {})",
                err.message, err.code
            )));
        }
        Ok(parsed.result)
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<Receipt> {
        loop {
            let receipt: Option<Receipt> = self
                .call("eth_getTransactionReceipt", json!([tx_hash.to_hex()]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn register_contribution(&self, call: &RegistrationCall) -> Result<TxHash> {
        let data = abi::encode_register(call);
        let tx = json!({
            "from": self.registrar.to_checksum(),
            "to": self.registry.to_checksum(),
            "data": format!("0x{}", hex::encode(data)),
        });

        let tx_hash: String = self
            .call("eth_sendTransaction", json!([tx]))
            .await?
            .ok_or_else(|| Error::Ledger("eth_sendTransaction returned no hash".to_string()))?;
        let tx_hash: TxHash = tx_hash
            .parse()
            .map_err(|e| Error::Ledger(format!("bad transaction hash {tx_hash}: {e}")))?;
        debug!("Submitted registration {} in {tx_hash}", call.id);

        let receipt = tokio::time::timeout(self.receipt_timeout, self.wait_for_receipt(&tx_hash))
            .await
            .map_err(|_| {
                warn!("Receipt for {tx_hash} not seen within {:?}", self.receipt_timeout);
                Error::Ledger(format!("timed out waiting for receipt of {tx_hash}"))
            })??;

        match receipt.status.as_deref() {
            Some(RECEIPT_SUCCESS) => {
                info!("Registered contribution {} on ledger in {tx_hash}", call.id);
                Ok(tx_hash)
            }
            other => Err(Error::Ledger(format!(
                "transaction {tx_hash} reverted (status {})",
                other.unwrap_or("missing")
            ))),
        }
    }

    async fn contribution_status(&self, id: &ContributionId) -> Result<LedgerStatus> {
        let call = json!({
            "to": self.registry.to_checksum(),
            "data": format!("0x{}", hex::encode(abi::encode_contributions_query(id))),
        });
        let output: String = self
            .call("eth_call", json!([call, "latest"]))
            .await?
            .ok_or_else(|| Error::Ledger("eth_call returned no data".to_string()))?;

        let bytes = hex::decode(output.trim_start_matches("0x"))
            .map_err(|e| Error::Ledger(format!("eth_call returned bad hex: {e}")))?;
        abi::decode_contribution_status(&bytes)
    }

    fn registrar_address(&self) -> Address {
        self.registrar
    }
}
