//! Price levels and the end-of-block orderbook diff event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::MarketId;

/// Aggregate quantity at one price on one side of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl Level {
    #[must_use]
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Every price level of one market touched during a block, tagged with the
/// market's new orderbook sequence. A zero quantity means the level is gone.
///
/// Consumers apply updates in `seq` order and resync on any gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookUpdate {
    pub seq: u64,
    pub market_id: MarketId,
    pub buy_levels: Vec<Level>,
    pub sell_levels: Vec<Level>,
}

impl OrderbookUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buy_levels.is_empty() && self.sell_levels.is_empty()
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.buy_levels.len() + self.sell_levels.len()
    }
}
