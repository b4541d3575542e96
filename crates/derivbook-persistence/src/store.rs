//! The exchange's state: a durable store plus a per-block transient overlay.
//!
//! The durable store outlives blocks. The transient store only records what
//! was touched during the current block and is cleared once the block's
//! orderbook updates have been emitted.

use std::str::FromStr;

use derivbook_types::{DerivbookError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::kv::MemStore;

/// Durable + transient key-value state of the exchange module.
#[derive(Debug, Clone, Default)]
pub struct ExchangeStore {
    pub(crate) durable: MemStore,
    pub(crate) transient: MemStore,
}

impl ExchangeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn durable(&self) -> &MemStore {
        &self.durable
    }

    #[must_use]
    pub fn transient(&self) -> &MemStore {
        &self.transient
    }

    /// Raw durable access. Bypasses every index; for tests and repairs.
    pub fn durable_mut(&mut self) -> &mut MemStore {
        &mut self.durable
    }

    /// Drop the per-block overlay.
    pub fn clear_transient(&mut self) {
        self.transient.clear();
    }
}

// =====================================================================
// Value codecs
// =====================================================================

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| DerivbookError::Serialization(e.to_string()))
}

pub(crate) fn decode_json<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| DerivbookError::CorruptedState {
        reason: format!("{what}: {e}"),
    })
}

pub(crate) fn encode_decimal(value: Decimal) -> Vec<u8> {
    value.normalize().to_string().into_bytes()
}

pub(crate) fn decode_decimal(bytes: &[u8], what: &str) -> Result<Decimal> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| Decimal::from_str(s).ok())
        .ok_or_else(|| DerivbookError::CorruptedState {
            reason: format!("{what}: not a decimal"),
        })
}
