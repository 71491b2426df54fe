//! HMAC-SHA256 verification of inbound webhook deliveries.
//!
//! The digest is computed over the exact bytes received. Parsing the body
//! before verification would re-encode it and break the comparison, so
//! callers must hand over the raw request body.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header requesting the development bypass.
pub const DEV_BYPASS_HEADER: &str = "x-dev-bypass";

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Verify a `sha256=<hex>` signature over `body` with `secret`.
///
/// Every malformed input (missing header, wrong prefix, undecodable hex,
/// wrong digest length, empty secret) yields `false`.
#[must_use]
pub fn verify_signature(body: &[u8], signature_header: Option<&str>, secret: &str) -> bool {
    let Some(header) = signature_header else {
        debug!("Missing signature header");
        return false;
    };
    let Some(received_hex) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        debug!("Signature header without {SIGNATURE_PREFIX} prefix");
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let Ok(received) = hex::decode(received_hex) else {
        debug!("Signature header is not valid hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if received.len() != expected.len() {
        return false;
    }
    expected.as_slice().ct_eq(&received).into()
}

/// Outcome of authenticating a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    /// Signature matched the shared secret.
    Verified,
    /// Accepted unsigned through the development bypass.
    DevBypass,
    /// Rejected; the delivery must not have side effects.
    Rejected,
}

impl Authentication {
    /// Returns true if the delivery may be processed.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Verified | Self::DevBypass)
    }
}

/// Authenticates deliveries against the configured secret.
#[derive(Debug, Clone)]
pub struct WebhookAuthenticator {
    secret: Option<String>,
    allow_dev_bypass: bool,
}

impl WebhookAuthenticator {
    /// Create an authenticator.
    ///
    /// An empty secret is treated as no secret.
    #[must_use]
    pub fn new(secret: Option<String>, allow_dev_bypass: bool) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if allow_dev_bypass {
            warn!("Webhook development bypass is enabled - do not use in production");
        }
        if secret.is_none() && !allow_dev_bypass {
            warn!("No webhook secret configured - every delivery will be rejected");
        }
        Self {
            secret,
            allow_dev_bypass,
        }
    }

    /// Decide whether a delivery is authentic.
    ///
    /// The bypass applies only when explicitly enabled and either the request
    /// asks for it (`X-Dev-Bypass: 1`) or no secret is configured.
    #[must_use]
    pub fn authenticate(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
        bypass_header: Option<&str>,
    ) -> Authentication {
        if self.allow_dev_bypass {
            let requested = bypass_header.is_some_and(|v| v.trim() == "1");
            if requested || self.secret.is_none() {
                debug!("Accepting delivery through development bypass");
                return Authentication::DevBypass;
            }
        }

        match &self.secret {
            Some(secret) if verify_signature(body, signature_header, secret) => {
                Authentication::Verified
            }
            _ => Authentication::Rejected,
        }
    }
}
