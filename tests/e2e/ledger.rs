//! In-process contribution registry.

use async_trait::async_trait;
use merge_rewards::{
    Address, ContributionId, Error, Ledger, LedgerStatus, RegistrationCall, Result, TxHash, H256,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Registrar account the test ledger signs with.
pub const REGISTRAR: Address = Address([0x5e; 20]);

/// A registry that lives in memory and can be taken offline.
pub struct TestLedger {
    online: AtomicBool,
    next_tx: AtomicU64,
    entries: Mutex<HashMap<ContributionId, LedgerStatus>>,
    submissions: Mutex<Vec<RegistrationCall>>,
}

impl TestLedger {
    /// An online, empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            next_tx: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Take the ledger offline or bring it back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Simulate the beneficiary claiming `id` on chain.
    pub fn claim(&self, id: &ContributionId) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(*id).or_default();
        entry.registered = true;
        entry.claimed = true;
    }

    /// Every successful registration, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<RegistrationCall> {
        self.submissions.lock().clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("connection refused".to_string()))
        }
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for TestLedger {
    async fn register_contribution(&self, call: &RegistrationCall) -> Result<TxHash> {
        self.check_online()?;
        let mut entries = self.entries.lock();
        if entries.get(&call.id).is_some_and(|s| s.registered) {
            return Err(Error::Ledger(format!("{} already registered", call.id)));
        }
        entries.insert(
            call.id,
            LedgerStatus {
                registered: true,
                claimed: false,
            },
        );
        self.submissions.lock().push(call.clone());

        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let mut tx = [0u8; 32];
        tx[0] = 0x7e;
        tx[24..].copy_from_slice(&n.to_be_bytes());
        Ok(H256(tx))
    }

    async fn contribution_status(&self, id: &ContributionId) -> Result<LedgerStatus> {
        self.check_online()?;
        Ok(self.entries.lock().get(id).copied().unwrap_or_default())
    }

    fn registrar_address(&self) -> Address {
        REGISTRAR
    }
}
