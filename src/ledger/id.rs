//! Deterministic contribution identifiers.
//!
//! The id must match the registry contract's
//! `keccak256(abi.encodePacked(repo, commitHash))`, so it is computed over the
//! repository's UTF-8 bytes followed by the raw 32-byte commit digest.

use crate::primitives::{keccak256, ContributionId, H256};

/// Derive the 32-byte commit digest from a commit identifier.
///
/// A 64-hex-digit identifier (optionally `0x`-prefixed) is used verbatim;
/// anything else, such as a 40-digit git SHA-1, is hashed with keccak256 over
/// its UTF-8 bytes.
#[must_use]
pub fn commit_digest(commit: &str) -> H256 {
    let digits = commit.strip_prefix("0x").unwrap_or(commit);
    if digits.len() == 64 {
        if let Ok(hash) = digits.parse::<H256>() {
            return hash;
        }
    }
    H256(keccak256(commit.as_bytes()))
}

/// Compute the contribution id for `repo` and `commit_hash`.
#[must_use]
pub fn compute_id(repo: &str, commit_hash: &H256) -> ContributionId {
    let mut packed = Vec::with_capacity(repo.len() + 32);
    packed.extend_from_slice(repo.as_bytes());
    packed.extend_from_slice(commit_hash.as_bytes());
    H256(keccak256(&packed))
}
