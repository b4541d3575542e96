//! Transient order buffer for the current block.
//!
//! Orders accepted during a block are collected here per (market, side) in
//! arrival order. Once the block's collection phase ends the buffer is
//! sealed, which commits to its contents with a digest, and each market's
//! orders are taken out in matching priority.

use std::collections::{BTreeMap, BTreeSet};

use derivbook_types::{
    DerivativeLimitOrder, DerivbookError, ExchangeConfig, MarketId, OrderHash, OrderSide, Result,
    constants,
};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Collects this block's new orders.
///
/// Once sealed, no more orders can be added.
#[derive(Debug, Clone)]
pub struct TransientOrderBuffer {
    /// Orders per book, in arrival order.
    books: BTreeMap<(MarketId, OrderSide), Vec<DerivativeLimitOrder>>,
    hashes: BTreeSet<OrderHash>,
    sealed: bool,
    max_orders: usize,
}

impl TransientOrderBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(constants::DEFAULT_MAX_TRANSIENT_ORDERS_PER_BLOCK)
    }

    #[must_use]
    pub fn with_capacity(max_orders: usize) -> Self {
        Self {
            books: BTreeMap::new(),
            hashes: BTreeSet::new(),
            sealed: false,
            max_orders,
        }
    }

    #[must_use]
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::with_capacity(config.max_transient_orders_per_block)
    }

    /// Append an accepted order.
    ///
    /// # Errors
    /// - `BufferAlreadySealed` once the buffer is sealed
    /// - `BufferFull` at capacity
    /// - `DuplicateOrder` if an order with the same hash is already buffered
    pub fn push(&mut self, order: DerivativeLimitOrder) -> Result<()> {
        if self.sealed {
            return Err(DerivbookError::BufferAlreadySealed);
        }
        if self.hashes.len() >= self.max_orders {
            return Err(DerivbookError::BufferFull);
        }
        if !self.hashes.insert(order.hash) {
            return Err(DerivbookError::DuplicateOrder(order.hash));
        }
        debug!(order = %order.hash, side = %order.side, price = %order.price, "transient order buffered");
        self.books
            .entry((order.market_id, order.side))
            .or_default()
            .push(order);
        Ok(())
    }

    /// Seal the buffer and return the digest of its contents.
    ///
    /// # Errors
    /// Returns `BufferAlreadySealed` if already sealed.
    pub fn seal(&mut self) -> Result<[u8; 32]> {
        if self.sealed {
            return Err(DerivbookError::BufferAlreadySealed);
        }
        self.sealed = true;
        Ok(self.digest())
    }

    /// SHA-256 over every buffered order hash, book by book in arrival order.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"derivbook:transient_orders:v1:");
        hasher.update((self.hashes.len() as u64).to_le_bytes());
        for ((market_id, side), orders) in &self.books {
            hasher.update(market_id.as_bytes());
            hasher.update([side.as_byte()]);
            hasher.update((orders.len() as u64).to_le_bytes());
            for order in orders {
                hasher.update(order.hash.as_bytes());
            }
        }
        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        digest
    }

    /// Markets with at least one buffered order, in id order.
    #[must_use]
    pub fn markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.books.keys().map(|(market_id, _)| *market_id).collect();
        markets.dedup();
        markets
    }

    /// Remove one book's orders in matching priority: best price first,
    /// arrival order within a price.
    ///
    /// # Errors
    /// The buffer must be sealed first.
    pub fn take_sorted(&mut self, market_id: &MarketId, side: OrderSide) -> Result<Vec<DerivativeLimitOrder>> {
        if !self.sealed {
            return Err(DerivbookError::InvalidOrder {
                reason: "cannot take orders from an unsealed transient buffer".to_string(),
            });
        }
        let mut orders = self.books.remove(&(*market_id, side)).unwrap_or_default();
        for order in &orders {
            self.hashes.remove(&order.hash);
        }
        // Stable sort keeps arrival order within a price.
        match side {
            OrderSide::Buy => orders.sort_by(|a, b| b.price.cmp(&a.price)),
            OrderSide::Sell => orders.sort_by(|a, b| a.price.cmp(&b.price)),
        }
        Ok(orders)
    }

    #[must_use]
    pub fn contains(&self, hash: &OrderHash) -> bool {
        self.hashes.contains(hash)
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Reset for the next block.
    pub fn reset(&mut self) {
        self.books.clear();
        self.hashes.clear();
        self.sealed = false;
    }
}

impl Default for TransientOrderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
