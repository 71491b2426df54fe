//! Minimal ABI encoding for the contribution registry.
//!
//! Only the two calls the registrar makes are supported:
//!
//! - `registerContribution(bytes32,address,string,bytes32,string,uint256,uint8,address)`
//! - `contributions(bytes32)`, whose return tuple is
//!   `(address beneficiary, string repo, bytes32 commitHash, string evidenceURI,
//!   uint256 reward, uint8 payoutMode, address token, bool claimed,
//!   uint64 registeredAt, address registrar)`

use super::{LedgerStatus, RegistrationCall};
use crate::error::{Error, Result};
use crate::primitives::{keccak256, Address, ContributionId};

/// Registration function signature.
pub const REGISTER_SIGNATURE: &str =
    "registerContribution(bytes32,address,string,bytes32,string,uint256,uint8,address)";

/// Contribution getter signature.
pub const CONTRIBUTIONS_SIGNATURE: &str = "contributions(bytes32)";

const WORD: usize = 32;
const REGISTER_HEAD_WORDS: usize = 8;
const BENEFICIARY_WORD: usize = 0;
const CLAIMED_WORD: usize = 7;

/// First four bytes of the keccak256 of a function signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Length word followed by the bytes, zero-padded to a word boundary.
fn string_tail(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut tail = Vec::with_capacity(WORD + padded);
    tail.extend_from_slice(&uint_word(bytes.len() as u64));
    tail.extend_from_slice(bytes);
    tail.resize(WORD + padded, 0);
    tail
}

/// Calldata for `registerContribution`.
#[must_use]
pub fn encode_register(call: &RegistrationCall) -> Vec<u8> {
    let repo_tail = string_tail(&call.repo);
    let evidence_tail = string_tail(&call.evidence_uri);
    let repo_offset = REGISTER_HEAD_WORDS * WORD;
    let evidence_offset = repo_offset + repo_tail.len();

    let mut data = Vec::with_capacity(4 + repo_offset + repo_tail.len() + evidence_tail.len());
    data.extend_from_slice(&selector(REGISTER_SIGNATURE));
    data.extend_from_slice(call.id.as_bytes());
    data.extend_from_slice(&address_word(&call.beneficiary));
    data.extend_from_slice(&uint_word(repo_offset as u64));
    data.extend_from_slice(call.commit_hash.as_bytes());
    data.extend_from_slice(&uint_word(evidence_offset as u64));
    data.extend_from_slice(&call.reward.to_word());
    data.extend_from_slice(&uint_word(u64::from(call.payout_mode.abi_code())));
    data.extend_from_slice(&address_word(&call.token));
    data.extend_from_slice(&repo_tail);
    data.extend_from_slice(&evidence_tail);
    data
}

/// Calldata for `contributions(id)`.
#[must_use]
pub fn encode_contributions_query(id: &ContributionId) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(CONTRIBUTIONS_SIGNATURE));
    data.extend_from_slice(id.as_bytes());
    data
}

/// Decode the registered/claimed facts from `contributions(id)` return data.
///
/// An unknown id returns the zero tuple, so a zero beneficiary means "not
/// registered".
///
/// # Errors
///
/// Returns `Error::Ledger` if the return data is shorter than the head.
pub fn decode_contribution_status(data: &[u8]) -> Result<LedgerStatus> {
    let word = |index: usize| -> Result<&[u8]> {
        data.get(index * WORD..(index + 1) * WORD).ok_or_else(|| {
            Error::Ledger(format!(
                "contributions() returned {} bytes, expected at least {}",
                data.len(),
                (CLAIMED_WORD + 1) * WORD
            ))
        })
    };

    let beneficiary = word(BENEFICIARY_WORD)?;
    let claimed = word(CLAIMED_WORD)?;
    Ok(LedgerStatus {
        registered: beneficiary.iter().any(|b| *b != 0),
        claimed: claimed.iter().any(|b| *b != 0),
    })
}
