//! Author handle to payable address resolution.

use crate::error::Result;
use crate::primitives::Address;
use crate::store::ContributionStore;
use tracing::debug;

/// Terminal rejection code for authors without a bound address.
pub const UNBOUND_REASON: &str = "no_bound_wallet_for_author";

/// Outcome of resolving an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The author has a bound payable address.
    Bound(Address),
    /// No handle in the event, or no binding for it.
    Unbound,
}

/// Resolves handles against the store's binding table.
#[derive(Clone)]
pub struct IdentityResolver {
    store: ContributionStore,
}

impl IdentityResolver {
    /// Create a resolver over `store`.
    #[must_use]
    pub fn new(store: ContributionStore) -> Self {
        Self { store }
    }

    /// Resolve `handle` to its bound address.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read.
    pub async fn resolve(&self, handle: Option<&str>) -> Result<Resolution> {
        let Some(handle) = handle.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(Resolution::Unbound);
        };
        let resolution = match self.store.resolve_identity(handle).await? {
            Some(address) => Resolution::Bound(address),
            None => Resolution::Unbound,
        };
        debug!("Resolved author {handle}: {resolution:?}");
        Ok(resolution)
    }

    /// Bind `handle` to `address`, replacing prior bindings of either.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an empty handle or the zero address,
    /// or a storage error if the binding cannot be written.
    pub async fn bind(&self, handle: &str, address: &Address) -> Result<()> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(crate::Error::InvalidInput("handle must not be empty".to_string()));
        }
        if address.is_zero() {
            return Err(crate::Error::InvalidInput(
                "cannot bind the zero address".to_string(),
            ));
        }
        self.store.bind_identity(handle, address).await
    }
}
