//! Resting limit orders and their lazy read cursor.
//!
//! Orders live under `(market, side, padded price, hash)`, so a forward scan
//! yields asks best-first and a reverse scan yields bids best-first. Within
//! one price, orders come out in key order of their hash.

use std::iter::Peekable;

use derivbook_types::{DerivativeLimitOrder, DerivbookError, MarketId, OrderHash, OrderSide, Result};
use tracing::{debug, trace};

use crate::keys;
use crate::kv::MemStore;
use crate::store::{ExchangeStore, decode_json, encode_json};

type Entries<'a> = Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a>;

/// Priority-ordered, lazily decoded view over one side of a market's resting
/// orders.
///
/// Each order is decoded only when requested, and [`reads`](Self::reads)
/// reports how many were. Once closed the cursor yields nothing; dropping it
/// releases it too.
pub struct RestingOrderCursor<'a> {
    market_id: MarketId,
    side: OrderSide,
    entries: Option<Peekable<Entries<'a>>>,
    reads: usize,
}

impl<'a> RestingOrderCursor<'a> {
    fn open(store: &'a MemStore, market_id: MarketId, side: OrderSide) -> Self {
        let range = store.prefix_range(&keys::resting_orders_prefix(&market_id, side));
        let entries: Entries<'a> = if side.is_buy() {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };
        Self {
            market_id,
            side,
            entries: Some(entries.peekable()),
            reads: 0,
        }
    }

    /// Whether another order is available without consuming it.
    pub fn has_next(&mut self) -> bool {
        self.entries
            .as_mut()
            .is_some_and(|entries| entries.peek().is_some())
    }

    /// Decode and return the next order in priority order.
    ///
    /// # Errors
    /// `CorruptedState` when the stored bytes do not decode to an order of
    /// this market and side.
    pub fn next_order(&mut self) -> Result<Option<DerivativeLimitOrder>> {
        let Some(entries) = self.entries.as_mut() else {
            return Ok(None);
        };
        let Some((_, value)) = entries.next() else {
            return Ok(None);
        };
        self.reads += 1;
        let order: DerivativeLimitOrder = decode_json(value, "resting order")?;
        if order.market_id != self.market_id || order.side != self.side {
            return Err(DerivbookError::CorruptedState {
                reason: format!("resting order {} stored under the wrong book", order.hash),
            });
        }
        Ok(Some(order))
    }

    /// Number of orders decoded so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.entries.is_none()
    }

    #[must_use]
    pub fn side(&self) -> OrderSide {
        self.side
    }

    /// Release the underlying scan. Safe to call more than once.
    pub fn close(&mut self) {
        if self.entries.take().is_some() {
            trace!(market = %self.market_id, side = %self.side, reads = self.reads, "resting order cursor closed");
        }
    }
}

impl std::fmt::Debug for RestingOrderCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestingOrderCursor")
            .field("market_id", &self.market_id)
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .field("reads", &self.reads)
            .finish()
    }
}

impl ExchangeStore {
    /// Open a priority-ordered cursor over one side of a market.
    #[must_use]
    pub fn resting_orders(&self, market_id: &MarketId, side: OrderSide) -> RestingOrderCursor<'_> {
        RestingOrderCursor::open(&self.durable, *market_id, side)
    }

    /// Write an order and its hash index entry. Does not touch price levels.
    pub fn set_resting_order(&mut self, order: &DerivativeLimitOrder) -> Result<()> {
        let key = keys::resting_order_key(&order.market_id, order.side, order.price, &order.hash)?;
        self.durable.set(key.clone(), encode_json(order)?);
        self.durable
            .set(keys::order_index_key(&order.market_id, &order.hash), key);
        Ok(())
    }

    /// Place a new resting order and add its `fillable` to its price level.
    ///
    /// # Errors
    /// `DuplicateOrder` if an order with the same hash already rests.
    pub fn insert_resting_order(&mut self, order: &DerivativeLimitOrder) -> Result<()> {
        if self
            .durable
            .has(&keys::order_index_key(&order.market_id, &order.hash))
        {
            return Err(DerivbookError::DuplicateOrder(order.hash));
        }
        self.set_resting_order(order)?;
        self.increment_price_level_quantity(&order.market_id, order.side, order.price, order.fillable)?;
        debug!(
            order = %order.hash,
            side = %order.side,
            price = %order.price,
            fillable = %order.fillable,
            "resting order placed"
        );
        Ok(())
    }

    pub fn get_resting_order(
        &self,
        market_id: &MarketId,
        hash: &OrderHash,
    ) -> Result<Option<DerivativeLimitOrder>> {
        let Some(key) = self.durable.get(&keys::order_index_key(market_id, hash)) else {
            return Ok(None);
        };
        let Some(bytes) = self.durable.get(key) else {
            return Err(DerivbookError::CorruptedState {
                reason: format!("order index for {hash} points at a missing order"),
            });
        };
        decode_json(bytes, "resting order").map(Some)
    }

    /// Remove an order and its index entry. Does not touch price levels.
    pub fn delete_resting_order(&mut self, order: &DerivativeLimitOrder) -> Result<()> {
        let key = keys::resting_order_key(&order.market_id, order.side, order.price, &order.hash)?;
        if !self.durable.delete(&key) {
            return Err(DerivbookError::OrderNotFound(order.hash));
        }
        self.durable
            .delete(&keys::order_index_key(&order.market_id, &order.hash));
        Ok(())
    }

    /// Delete an order and take its `fillable` off its price level.
    ///
    /// # Errors
    /// `OrderNotFound` if it is not resting; `NegativePriceLevel` if the
    /// level holds less than the order.
    pub fn remove_resting_order(&mut self, order: &DerivativeLimitOrder) -> Result<()> {
        self.delete_resting_order(order)?;
        self.decrement_price_level_quantity(&order.market_id, order.side, order.price, order.fillable)
    }

    /// Every resting order of one side, best first.
    pub fn resting_orders_vec(
        &self,
        market_id: &MarketId,
        side: OrderSide,
    ) -> Result<Vec<DerivativeLimitOrder>> {
        let mut cursor = self.resting_orders(market_id, side);
        let mut orders = Vec::new();
        while let Some(order) = cursor.next_order()? {
            orders.push(order);
        }
        Ok(orders)
    }

    /// Every resting order in the store, grouped by market and side.
    pub fn all_resting_orders(&self) -> Result<Vec<DerivativeLimitOrder>> {
        self.durable
            .prefix_range(&keys::resting_orders_all_prefix())
            .map(|(_, value)| decode_json(value, "resting order"))
            .collect()
    }
}
