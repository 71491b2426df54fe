//! Ledger-facing primitives: addresses, 32-byte hashes, reward amounts and
//! payout modes.
//!
//! These types are shared by the store, the ledger registrar and the HTTP
//! surface, so they all serialize as the same hex/decimal strings the registry
//! contract and its clients use.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// A 32-byte hash (contribution id, commit digest or transaction hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

/// Deterministic contribution identifier.
pub type ContributionId = H256;

/// Ledger transaction hash.
pub type TxHash = H256;

impl H256 {
    /// The all-zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex (66 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = strip_hex_prefix(s.trim());
        if digits.len() != 64 {
            return Err(Error::InvalidInput(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| Error::InvalidInput(format!("bad hex: {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 20-byte EVM account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address (used as the token for native payouts).
    pub const ZERO: Self = Self([0u8; 20]);

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns true for the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// EIP-55 mixed-case checksum encoding.
    #[must_use]
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `0x` + 40 hex digits. All-lower and all-upper input is accepted
    /// as is; mixed-case input must carry a valid EIP-55 checksum.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidInput(format!("address must start with 0x: {s}")))?;
        if digits.len() != 40 {
            return Err(Error::InvalidInput(format!(
                "address must have 40 hex digits: {s}"
            )));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| Error::InvalidInput(format!("bad address hex: {e}")))?;
        let address = Self(out);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(Error::InvalidInput(format!("bad address checksum: {s}")));
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reward amount in the payout asset's smallest unit.
///
/// Carried as a canonical decimal string (no leading zeros) so arbitrarily
/// large values survive JSON and SQL round trips; always fits a uint256.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RewardAmount(String);

impl RewardAmount {
    /// Zero reward.
    #[must_use]
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Decimal representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Big-endian 32-byte ABI word.
    #[must_use]
    pub fn to_word(&self) -> [u8; 32] {
        // Validated on construction, so the conversion cannot overflow.
        decimal_to_word(&self.0).unwrap_or([0u8; 32])
    }
}

fn decimal_to_word(s: &str) -> Result<[u8; 32]> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "reward must be a non-negative integer: {s:?}"
        )));
    }
    let mut out = [0u8; 32];
    for ch in s.bytes() {
        let mut carry = u32::from(ch - b'0');
        for byte in out.iter_mut().rev() {
            let v = u32::from(*byte) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return Err(Error::InvalidInput(format!("reward exceeds uint256: {s}")));
        }
    }
    Ok(out)
}

impl FromStr for RewardAmount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        decimal_to_word(s)?;
        let canonical = s.trim_start_matches('0');
        if canonical.is_empty() {
            Ok(Self::zero())
        } else {
            Ok(Self(canonical.to_string()))
        }
    }
}

impl fmt::Display for RewardAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for RewardAmount {
    fn default() -> Self {
        Self::zero()
    }
}

impl Serialize for RewardAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RewardAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a contribution's reward is paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PayoutMode {
    /// The chain's native currency.
    #[default]
    #[serde(rename = "NATIVE", alias = "native")]
    Native,
    /// An ERC-20 token.
    #[serde(rename = "ERC20", alias = "erc20")]
    Erc20,
}

impl PayoutMode {
    /// Canonical upper-case name as stored and returned by the API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "NATIVE",
            Self::Erc20 => "ERC20",
        }
    }

    /// Value of the contract's `uint8 payoutMode` argument.
    #[must_use]
    pub fn abi_code(self) -> u8 {
        match self {
            Self::Native => 0,
            Self::Erc20 => 1,
        }
    }
}

impl FromStr for PayoutMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NATIVE" => Ok(Self::Native),
            "ERC20" => Ok(Self::Erc20),
            other => Err(Error::InvalidInput(format!("unknown payout mode: {other}"))),
        }
    }
}

impl fmt::Display for PayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
