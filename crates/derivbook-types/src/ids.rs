//! Identifiers used throughout derivbook.
//!
//! Every identifier is a fixed-width byte string derived deterministically
//! with SHA-256, so all replicas compute the same ids from the same inputs.
//! No wall clock and no randomness are involved.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// MarketId
// ---------------------------------------------------------------------------

/// 32-byte market identifier. Byte order defines the market iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketId(pub [u8; 32]);

impl MarketId {
    /// Derive a market id from its ticker (e.g. `"BTC/USDT PERP"`).
    #[must_use]
    pub fn from_ticker(ticker: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"derivbook:market:");
        hasher.update(ticker.as_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// SubaccountId
// ---------------------------------------------------------------------------

/// 32-byte sub-ledger account identifier owning orders and positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubaccountId(pub [u8; 32]);

impl SubaccountId {
    /// Derive the `nonce`-th subaccount of a trader address.
    #[must_use]
    pub fn from_trader(trader: &str, nonce: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"derivbook:subaccount:");
        hasher.update(trader.as_bytes());
        hasher.update(nonce.to_be_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SubaccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// OrderHash
// ---------------------------------------------------------------------------

/// 32-byte order identity. Computed once from the order's immutable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderHash(pub [u8; 32]);

impl OrderHash {
    #[must_use]
    pub fn from_digest(hasher: Sha256) -> Self {
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 32-byte slice (e.g. the tail of a store key).
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// BlockHeight
// ---------------------------------------------------------------------------

/// Height of the block currently being executed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}
