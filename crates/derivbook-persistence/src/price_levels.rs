//! Price-level aggregate index and orderbook sequences.
//!
//! Every `(market, side, price)` holds the total `fillable` of the resting
//! orders at that price. Writes go to the durable store (zero deletes the
//! entry) and are mirrored into the transient overlay, which is drained into
//! sequenced [`OrderbookUpdate`]s at the end of the block.

use std::collections::BTreeMap;

use derivbook_types::{DerivbookError, Level, MarketId, OrderSide, OrderbookUpdate, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::keys;
use crate::store::{ExchangeStore, decode_decimal, encode_decimal};

/// Which bound stops a depth query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelsLimit {
    #[default]
    Unlimited,
    /// At most this many levels.
    Count(usize),
    /// Stop once the levels already returned reach this notional.
    CumulativeNotional(Decimal),
    /// Stop once the levels already returned reach this quantity.
    CumulativeQuantity(Decimal),
}

impl LevelsLimit {
    /// Pick the first bound supplied, in the order count, notional, quantity.
    #[must_use]
    pub fn first_of(
        count: Option<usize>,
        cumulative_notional: Option<Decimal>,
        cumulative_quantity: Option<Decimal>,
    ) -> Self {
        match (count, cumulative_notional, cumulative_quantity) {
            (Some(n), _, _) => Self::Count(n),
            (None, Some(notional), _) => Self::CumulativeNotional(notional),
            (None, None, Some(quantity)) => Self::CumulativeQuantity(quantity),
            (None, None, None) => Self::Unlimited,
        }
    }

    fn reached(self, count: usize, notional: Decimal, quantity: Decimal) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Count(limit) => count >= limit,
            Self::CumulativeNotional(limit) => notional >= limit,
            Self::CumulativeQuantity(limit) => quantity >= limit,
        }
    }
}

impl ExchangeStore {
    // =====================================================================
    // Levels
    // =====================================================================

    /// Quantity at a price: this block's overlay first, then the durable
    /// index, then zero.
    pub fn get_price_level_quantity(
        &self,
        market_id: &MarketId,
        side: OrderSide,
        price: Decimal,
    ) -> Result<Decimal> {
        let transient_key = keys::transient_price_level_key(market_id, side, price)?;
        if let Some(bytes) = self.transient.get(&transient_key) {
            return decode_decimal(bytes, "transient price level");
        }
        let key = keys::price_level_key(market_id, side, price)?;
        match self.durable.get(&key) {
            Some(bytes) => decode_decimal(bytes, "price level"),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Overwrite a level. A zero quantity removes the durable entry; the
    /// overlay always records the new value.
    pub fn set_price_level_quantity(
        &mut self,
        market_id: &MarketId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<()> {
        if quantity.is_sign_negative() && !quantity.is_zero() {
            return Err(DerivbookError::NegativePriceLevel { price, quantity });
        }
        let key = keys::price_level_key(market_id, side, price)?;
        if quantity.is_zero() {
            self.durable.delete(&key);
        } else {
            self.durable.set(key, encode_decimal(quantity));
        }
        self.transient.set(
            keys::transient_price_level_key(market_id, side, price)?,
            encode_decimal(quantity),
        );
        Ok(())
    }

    pub fn increment_price_level_quantity(
        &mut self,
        market_id: &MarketId,
        side: OrderSide,
        price: Decimal,
        delta: Decimal,
    ) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let current = self.get_price_level_quantity(market_id, side, price)?;
        self.set_price_level_quantity(market_id, side, price, current + delta)
    }

    /// # Errors
    /// `NegativePriceLevel` if the level would drop below zero.
    pub fn decrement_price_level_quantity(
        &mut self,
        market_id: &MarketId,
        side: OrderSide,
        price: Decimal,
        delta: Decimal,
    ) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let current = self.get_price_level_quantity(market_id, side, price)?;
        let updated = current - delta;
        if updated < Decimal::ZERO {
            return Err(DerivbookError::NegativePriceLevel {
                price,
                quantity: updated,
            });
        }
        self.set_price_level_quantity(market_id, side, price, updated)
    }

    /// Durable levels of one side, best first, cut off by `limit`.
    ///
    /// The bound is checked before each level is appended, so a cumulative
    /// limit may be overshot by the last level returned.
    pub fn get_levels(
        &self,
        market_id: &MarketId,
        side: OrderSide,
        limit: LevelsLimit,
    ) -> Result<Vec<Level>> {
        let range = self
            .durable
            .prefix_range(&keys::price_levels_prefix(market_id, side));
        let entries: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)> + '_> = if side.is_buy() {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let mut levels = Vec::new();
        let mut cumulative_notional = Decimal::ZERO;
        let mut cumulative_quantity = Decimal::ZERO;
        for (key, value) in entries {
            if limit.reached(levels.len(), cumulative_notional, cumulative_quantity) {
                break;
            }
            let (_, _, price) = keys::parse_price_level_key(key)?;
            let quantity = decode_decimal(value, "price level")?;
            let level = Level::new(price, quantity);
            cumulative_notional += level.notional();
            cumulative_quantity += quantity;
            levels.push(level);
        }
        Ok(levels)
    }

    /// Best durable price on one side.
    pub fn best_price(&self, market_id: &MarketId, side: OrderSide) -> Result<Option<Decimal>> {
        Ok(self
            .get_levels(market_id, side, LevelsLimit::Count(1))?
            .first()
            .map(|level| level.price))
    }

    /// Mid price and top of book. The mid is `None` unless both sides exist.
    pub fn mid_price_and_tob(
        &self,
        market_id: &MarketId,
    ) -> Result<(Option<Decimal>, Option<Decimal>, Option<Decimal>)> {
        let best_buy = self.best_price(market_id, OrderSide::Buy)?;
        let best_sell = self.best_price(market_id, OrderSide::Sell)?;
        let mid = match (best_buy, best_sell) {
            (Some(buy), Some(sell)) => Some((buy + sell) / Decimal::TWO),
            _ => None,
        };
        Ok((mid, best_buy, best_sell))
    }

    /// Mid price, or the only side's best price when the other is empty.
    pub fn mid_price_or_best_price(&self, market_id: &MarketId) -> Result<Option<Decimal>> {
        let (mid, best_buy, best_sell) = self.mid_price_and_tob(market_id)?;
        Ok(mid.or(best_buy).or(best_sell))
    }

    // =====================================================================
    // Sequences
    // =====================================================================

    pub fn orderbook_sequence(&self, market_id: &MarketId) -> Result<u64> {
        match self.durable.get(&keys::orderbook_sequence_key(market_id)) {
            None => Ok(0),
            Some(bytes) => {
                let raw: [u8; 8] =
                    bytes
                        .try_into()
                        .map_err(|_| DerivbookError::CorruptedState {
                            reason: format!("orderbook sequence of {market_id}"),
                        })?;
                Ok(u64::from_be_bytes(raw))
            }
        }
    }

    pub fn set_orderbook_sequence(&mut self, market_id: &MarketId, sequence: u64) {
        self.durable.set(
            keys::orderbook_sequence_key(market_id),
            sequence.to_be_bytes().to_vec(),
        );
    }

    pub fn increment_orderbook_sequence(&mut self, market_id: &MarketId) -> Result<u64> {
        let next = self
            .orderbook_sequence(market_id)?
            .checked_add(1)
            .ok_or_else(|| DerivbookError::Internal(format!("sequence overflow in {market_id}")))?;
        self.set_orderbook_sequence(market_id, next);
        Ok(next)
    }

    // =====================================================================
    // End of block
    // =====================================================================

    /// Group this block's touched levels by market, bump each touched
    /// market's sequence once, and return one update per market in market-id
    /// order. Clears the overlay. Markets with nothing touched emit nothing.
    pub fn increment_sequence_and_emit_orderbook_updates(
        &mut self,
    ) -> Result<Vec<OrderbookUpdate>> {
        let mut touched: BTreeMap<MarketId, (Vec<Level>, Vec<Level>)> = BTreeMap::new();
        for (key, value) in self
            .transient
            .prefix_range(&keys::transient_price_levels_all_prefix())
        {
            let (market_id, side, price) = keys::parse_price_level_key(key)?;
            let quantity = decode_decimal(value, "transient price level")?;
            let entry = touched.entry(market_id).or_default();
            let level = Level::new(price, quantity);
            match side {
                OrderSide::Buy => entry.0.push(level),
                OrderSide::Sell => entry.1.push(level),
            }
        }

        let mut updates = Vec::with_capacity(touched.len());
        for (market_id, (mut buy_levels, sell_levels)) in touched {
            buy_levels.reverse();
            let seq = self.increment_orderbook_sequence(&market_id)?;
            debug!(
                market = %market_id,
                seq,
                buys = buy_levels.len(),
                sells = sell_levels.len(),
                "orderbook update"
            );
            updates.push(OrderbookUpdate {
                seq,
                market_id,
                buy_levels,
                sell_levels,
            });
        }
        self.transient.clear();

        if !updates.is_empty() {
            info!(markets = updates.len(), "orderbook updates emitted");
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketId {
        MarketId::from_ticker("BTC/USDT PERP")
    }

    fn d(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn get_defaults_to_zero() {
        let store = ExchangeStore::new();
        assert_eq!(
            store
                .get_price_level_quantity(&market(), OrderSide::Buy, d(10))
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn get_prefers_overlay() {
        let mut store = ExchangeStore::new();
        store
            .set_price_level_quantity(&market(), OrderSide::Buy, d(10), d(4))
            .unwrap();
        // Durable drift that the overlay shadows within the block.
        let key = keys::price_level_key(&market(), OrderSide::Buy, d(10)).unwrap();
        store.durable_mut().set(key, b"99".to_vec());
        assert_eq!(
            store
                .get_price_level_quantity(&market(), OrderSide::Buy, d(10))
                .unwrap(),
            d(4)
        );
        store.clear_transient();
        assert_eq!(
            store
                .get_price_level_quantity(&market(), OrderSide::Buy, d(10))
                .unwrap(),
            d(99)
        );
    }

    #[test]
    fn zero_deletes_durable_but_records_overlay() {
        let mut store = ExchangeStore::new();
        store
            .set_price_level_quantity(&market(), OrderSide::Sell, d(10), d(4))
            .unwrap();
        store
            .set_price_level_quantity(&market(), OrderSide::Sell, d(10), Decimal::ZERO)
            .unwrap();
        assert!(store.durable().is_empty());
        assert_eq!(store.transient().len(), 1);
    }

    #[test]
    fn net_effect_of_increments_and_decrements() {
        let mut store = ExchangeStore::new();
        let m = market();
        store.increment_price_level_quantity(&m, OrderSide::Buy, d(5), d(3)).unwrap();
        store.increment_price_level_quantity(&m, OrderSide::Buy, d(5), d(4)).unwrap();
        store.decrement_price_level_quantity(&m, OrderSide::Buy, d(5), d(2)).unwrap();
        assert_eq!(store.get_price_level_quantity(&m, OrderSide::Buy, d(5)).unwrap(), d(5));
        assert!(matches!(
            store.decrement_price_level_quantity(&m, OrderSide::Buy, d(5), d(6)),
            Err(DerivbookError::NegativePriceLevel { .. })
        ));
    }

    #[test]
    fn zero_delta_does_not_touch_overlay() {
        let mut store = ExchangeStore::new();
        store
            .increment_price_level_quantity(&market(), OrderSide::Buy, d(5), Decimal::ZERO)
            .unwrap();
        store
            .decrement_price_level_quantity(&market(), OrderSide::Buy, d(5), Decimal::ZERO)
            .unwrap();
        assert!(store.transient().is_empty());
        assert!(store.increment_sequence_and_emit_orderbook_updates().unwrap().is_empty());
    }

    #[test]
    fn levels_are_sorted_and_pruned() {
        let mut store = ExchangeStore::new();
        let m = market();
        for (price, qty) in [(100, 1), (102, 2), (101, 3)] {
            store.set_price_level_quantity(&m, OrderSide::Buy, d(price), d(qty)).unwrap();
            store.set_price_level_quantity(&m, OrderSide::Sell, d(price + 10), d(qty)).unwrap();
        }
        store.decrement_price_level_quantity(&m, OrderSide::Buy, d(101), d(3)).unwrap();

        let bids = store.get_levels(&m, OrderSide::Buy, LevelsLimit::Unlimited).unwrap();
        assert_eq!(bids, vec![Level::new(d(102), d(2)), Level::new(d(100), d(1))]);
        let asks = store.get_levels(&m, OrderSide::Sell, LevelsLimit::Count(2)).unwrap();
        assert_eq!(asks, vec![Level::new(d(110), d(1)), Level::new(d(111), d(3))]);
    }

    #[test]
    fn cumulative_limits_stop_after_reaching_bound() {
        let mut store = ExchangeStore::new();
        let m = market();
        for price in [10, 11, 12, 13] {
            store.set_price_level_quantity(&m, OrderSide::Sell, d(price), d(2)).unwrap();
        }
        // 10*2 = 20 < 30, then 20 + 22 = 42 >= 30 -> stop after two.
        let by_notional = store
            .get_levels(&m, OrderSide::Sell, LevelsLimit::CumulativeNotional(d(30)))
            .unwrap();
        assert_eq!(by_notional.len(), 2);
        let by_quantity = store
            .get_levels(&m, OrderSide::Sell, LevelsLimit::CumulativeQuantity(d(5)))
            .unwrap();
        assert_eq!(by_quantity.len(), 3);
        assert!(store
            .get_levels(&m, OrderSide::Sell, LevelsLimit::Count(0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn first_supplied_limit_wins() {
        assert_eq!(
            LevelsLimit::first_of(Some(3), Some(d(1)), None),
            LevelsLimit::Count(3)
        );
        assert_eq!(
            LevelsLimit::first_of(None, Some(d(1)), Some(d(2))),
            LevelsLimit::CumulativeNotional(d(1))
        );
        assert_eq!(
            LevelsLimit::first_of(None, None, Some(d(2))),
            LevelsLimit::CumulativeQuantity(d(2))
        );
        assert_eq!(LevelsLimit::first_of(None, None, None), LevelsLimit::Unlimited);
    }

    #[test]
    fn mid_price_rules() {
        let mut store = ExchangeStore::new();
        let m = market();
        assert_eq!(store.mid_price_or_best_price(&m).unwrap(), None);
        store.set_price_level_quantity(&m, OrderSide::Buy, d(99), d(1)).unwrap();
        assert_eq!(store.mid_price_and_tob(&m).unwrap(), (None, Some(d(99)), None));
        assert_eq!(store.mid_price_or_best_price(&m).unwrap(), Some(d(99)));
        store.set_price_level_quantity(&m, OrderSide::Sell, d(102), d(1)).unwrap();
        assert_eq!(
            store.mid_price_and_tob(&m).unwrap().0,
            Some(Decimal::new(1005, 1))
        );
    }

    #[test]
    fn emission_groups_by_market_and_bumps_sequence_once() {
        let mut store = ExchangeStore::new();
        let a = MarketId([1u8; 32]);
        let b = MarketId([2u8; 32]);
        store.set_price_level_quantity(&b, OrderSide::Sell, d(5), d(1)).unwrap();
        store.set_price_level_quantity(&a, OrderSide::Buy, d(1), d(1)).unwrap();
        store.set_price_level_quantity(&a, OrderSide::Buy, d(2), d(1)).unwrap();
        store.set_price_level_quantity(&a, OrderSide::Sell, d(3), Decimal::ZERO).unwrap();

        let updates = store.increment_sequence_and_emit_orderbook_updates().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].market_id, a);
        assert_eq!(updates[0].seq, 1);
        assert_eq!(
            updates[0].buy_levels,
            vec![Level::new(d(2), d(1)), Level::new(d(1), d(1))]
        );
        assert_eq!(updates[0].sell_levels, vec![Level::new(d(3), Decimal::ZERO)]);
        assert_eq!(updates[1].market_id, b);
        assert_eq!(updates[1].seq, 1);
        assert!(store.transient().is_empty());

        store.set_price_level_quantity(&a, OrderSide::Buy, d(1), d(7)).unwrap();
        let updates = store.increment_sequence_and_emit_orderbook_updates().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].seq, 2);
        assert_eq!(store.orderbook_sequence(&b).unwrap(), 1);
    }

    #[test]
    fn corrupted_sequence_is_reported() {
        let mut store = ExchangeStore::new();
        store
            .durable_mut()
            .set(keys::orderbook_sequence_key(&market()), vec![1, 2, 3]);
        assert!(matches!(
            store.orderbook_sequence(&market()),
            Err(DerivbookError::CorruptedState { .. })
        ));
    }
}
