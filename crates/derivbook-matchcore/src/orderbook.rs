//! One side of one market's book during a matching pass.
//!
//! A [`DerivativeLimitOrderbook`] fuses two priority-sorted sources:
//! - **resting** orders, read lazily from the durable index through a
//!   [`RestingOrderCursor`] (each order is decoded at most once)
//! - **transient** orders placed this block, held in memory
//!
//! The driver only sees `peek` and `fill`. Before an order is exposed it is
//! validated against its owner's position and the market's margin rules; an
//! order that fails is recorded as a cancellation, excluded from the fill
//! accessors, and the next candidate is tried.
//!
//! At equal prices the resting order wins; the transient order is picked only
//! when its price is strictly better.

use std::collections::BTreeSet;

use derivbook_persistence::{PositionKeeper, RestingOrderCursor};
use derivbook_types::{
    DerivativeLimitOrder, DerivativeMarket, DerivbookError, Level, MarketType, OrderHash,
    OrderSide, PerpetualMarketFunding, Position, PositionState, PositionStates, Result,
    SubaccountId,
};
use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::fills::OrderbookFills;

/// Which fill set an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSource {
    Resting,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// No current order; the next peek picks one.
    Empty,
    /// Picked but not yet validated.
    CandidateLoaded { source: FillSource, index: usize },
    /// Validated and exposed to the driver.
    Fillable { source: FillSource, index: usize },
}

enum Validation {
    Accepted,
    Rejected(DerivbookError),
}

/// Matching cursor over one side of a derivative market.
pub struct DerivativeLimitOrderbook<'a> {
    side: OrderSide,
    market: &'a DerivativeMarket,
    mark_price: Option<Decimal>,
    funding: Option<PerpetualMarketFunding>,
    positions: &'a dyn PositionKeeper,

    resting_cursor: RestingOrderCursor<'a>,
    resting: OrderbookFills,
    resting_index: usize,
    transient: OrderbookFills,
    transient_index: usize,

    state: CursorState,
    cancelled: BTreeSet<OrderHash>,
    resting_cancels: Vec<DerivativeLimitOrder>,
    transient_cancels: Vec<DerivativeLimitOrder>,

    notional: Decimal,
    total_quantity: Decimal,
}

impl<'a> DerivativeLimitOrderbook<'a> {
    /// Open a book over `resting_cursor` and this block's `transient_orders`
    /// (already priority-sorted for `side`).
    ///
    /// Returns `None` when there is nothing on this side at all, so the
    /// driver can skip it. The cursor is closed in that case.
    #[must_use]
    pub fn new(
        side: OrderSide,
        transient_orders: Vec<DerivativeLimitOrder>,
        mut resting_cursor: RestingOrderCursor<'a>,
        market: &'a DerivativeMarket,
        mark_price: Option<Decimal>,
        funding: Option<PerpetualMarketFunding>,
        positions: &'a dyn PositionKeeper,
    ) -> Option<Self> {
        if transient_orders.is_empty() && !resting_cursor.has_next() {
            resting_cursor.close();
            return None;
        }
        Some(Self {
            side,
            market,
            mark_price,
            funding,
            positions,
            resting_cursor,
            resting: OrderbookFills::default(),
            resting_index: 0,
            transient: OrderbookFills::new(transient_orders),
            transient_index: 0,
            state: CursorState::Empty,
            cancelled: BTreeSet::new(),
            resting_cancels: Vec::new(),
            transient_cancels: Vec::new(),
            notional: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
        })
    }

    // =================================================================
    // Driver contract
    // =================================================================

    /// Price and remaining quantity of the best valid order, validating and
    /// cancelling candidates as needed. `None` once both sources are spent.
    ///
    /// # Errors
    /// Storage decode failures. These are fatal for the block.
    pub fn peek(&mut self, positions: &mut PositionStates) -> Result<Option<Level>> {
        self.advance(positions)?;
        let CursorState::Fillable { source, index } = self.state else {
            return Ok(None);
        };
        let fills = self.fills(source);
        Ok(Some(Level::new(fills.orders[index].price, fills.remaining(index))))
    }

    /// Fill the current order by `quantity`.
    ///
    /// # Panics
    /// If no order is fillable or `quantity` exceeds what the last `peek`
    /// reported. Both are caller bugs.
    pub fn fill(&mut self, quantity: Decimal) {
        let CursorState::Fillable { source, index } = self.state else {
            panic!("fill({quantity}) called on the {} book without a fillable order", self.side);
        };
        assert!(
            !quantity.is_sign_negative() || quantity.is_zero(),
            "negative fill quantity {quantity}"
        );

        let fills = self.fills_mut(source);
        let cumulative = fills.add_fill(index, quantity);
        let order = &fills.orders[index];
        let price = order.price;
        let exhausted = cumulative == order.fillable;
        trace!(order = %order.hash, %quantity, %cumulative, "fill");

        self.notional += price * quantity;
        self.total_quantity += quantity;

        if exhausted {
            self.state = CursorState::Empty;
            match source {
                FillSource::Resting => self.resting_index += 1,
                FillSource::Transient => self.transient_index += 1,
            }
        }
    }

    /// Release the resting-order cursor. Idempotent; accessors keep working.
    pub fn close(&mut self) {
        self.resting_cursor.close();
    }

    // =================================================================
    // Accessors
    // =================================================================

    #[must_use]
    pub fn side(&self) -> OrderSide {
        self.side
    }

    /// Sum of `price * quantity` over every fill applied.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.notional
    }

    #[must_use]
    pub fn total_quantity_filled(&self) -> Decimal {
        self.total_quantity
    }

    /// Resting orders inspected so far with their fills, minus cancellations.
    #[must_use]
    pub fn resting_fills(&self) -> OrderbookFills {
        self.resting.without(&self.cancelled)
    }

    /// Transient orders with their fills, minus cancellations.
    #[must_use]
    pub fn transient_fills(&self) -> OrderbookFills {
        self.transient.without(&self.cancelled)
    }

    #[must_use]
    pub fn resting_cancels(&self) -> &[DerivativeLimitOrder] {
        &self.resting_cancels
    }

    #[must_use]
    pub fn transient_cancels(&self) -> &[DerivativeLimitOrder] {
        &self.transient_cancels
    }

    #[must_use]
    pub fn is_cancelled(&self, hash: &OrderHash) -> bool {
        self.cancelled.contains(hash)
    }

    /// Resting orders decoded from storage so far.
    #[must_use]
    pub fn resting_reads(&self) -> usize {
        self.resting_cursor.reads()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.resting_cursor.is_closed()
    }

    // =================================================================
    // Candidate selection and validation
    // =================================================================

    fn fills(&self, source: FillSource) -> &OrderbookFills {
        match source {
            FillSource::Resting => &self.resting,
            FillSource::Transient => &self.transient,
        }
    }

    fn fills_mut(&mut self, source: FillSource) -> &mut OrderbookFills {
        match source {
            FillSource::Resting => &mut self.resting,
            FillSource::Transient => &mut self.transient,
        }
    }

    fn advance(&mut self, positions: &mut PositionStates) -> Result<()> {
        loop {
            let (source, index) = match self.state {
                CursorState::Fillable { .. } => return Ok(()),
                CursorState::CandidateLoaded { source, index } => (source, index),
                CursorState::Empty => match self.pick_candidate()? {
                    Some((source, index)) => {
                        self.state = CursorState::CandidateLoaded { source, index };
                        continue;
                    }
                    None => return Ok(()),
                },
            };
            match self.validate(source, index, positions)? {
                Validation::Accepted => self.state = CursorState::Fillable { source, index },
                Validation::Rejected(reason) => self.reject(source, index, &reason),
            }
        }
    }

    /// Index of the next resting order with something left, decoding one more
    /// order from storage only when every loaded one is spent.
    fn resting_head(&mut self) -> Result<Option<usize>> {
        loop {
            if self.resting_index < self.resting.len() {
                if self.resting.remaining(self.resting_index) > Decimal::ZERO {
                    return Ok(Some(self.resting_index));
                }
                self.resting_index += 1;
                continue;
            }
            match self.resting_cursor.next_order()? {
                Some(order) => {
                    self.resting.push(order);
                }
                None => return Ok(None),
            }
        }
    }

    fn transient_head(&mut self) -> Option<usize> {
        while self.transient_index < self.transient.len() {
            if self.transient.remaining(self.transient_index) > Decimal::ZERO {
                return Some(self.transient_index);
            }
            self.transient_index += 1;
        }
        None
    }

    fn pick_candidate(&mut self) -> Result<Option<(FillSource, usize)>> {
        let resting = self.resting_head()?;
        let transient = self.transient_head();
        Ok(match (resting, transient) {
            (Some(r), Some(t)) => {
                let transient_price = self.transient.orders[t].price;
                let resting_price = self.resting.orders[r].price;
                if self.side.is_strictly_better(transient_price, resting_price) {
                    Some((FillSource::Transient, t))
                } else {
                    Some((FillSource::Resting, r))
                }
            }
            (Some(r), None) => Some((FillSource::Resting, r)),
            (None, Some(t)) => Some((FillSource::Transient, t)),
            (None, None) => None,
        })
    }

    /// Cached, funding-adjusted position of `subaccount_id`, loading or
    /// creating it on first touch.
    fn position_state<'s>(
        &self,
        positions: &'s mut PositionStates,
        subaccount_id: &SubaccountId,
    ) -> Result<&'s PositionState> {
        if !positions.contains(subaccount_id) {
            let mut position = match self
                .positions
                .get_position(&self.market.market_id, subaccount_id)?
            {
                Some(position) => position,
                None => Position::new(
                    self.side.is_buy(),
                    self.funding
                        .map_or(Decimal::ZERO, |f| f.cumulative_funding),
                ),
            };
            position.apply_funding(self.funding.as_ref());
            positions.insert(*subaccount_id, PositionState { position });
        }
        positions.get(subaccount_id).ok_or_else(|| {
            DerivbookError::Internal(format!("position state for {subaccount_id} vanished"))
        })
    }

    fn validate(
        &self,
        source: FillSource,
        index: usize,
        positions: &mut PositionStates,
    ) -> Result<Validation> {
        let order = &self.fills(source).orders[index];
        let position = &self.position_state(positions, &order.subaccount_id)?.position;

        if position.is_closed_by(order.is_buy()) {
            let fee_rate = self.market.fee_rate(source == FillSource::Resting);
            let closing_quantity = order.quantity.min(position.quantity);
            let closing_margin = order.margin_for(closing_quantity);
            if let Err(reason) = position.check_valid_position_to_reduce(
                self.market.market_type,
                order.price,
                self.side.is_buy(),
                fee_rate,
                self.funding.as_ref(),
                closing_margin,
            ) {
                return Ok(Validation::Rejected(reason));
            }
        }

        if order.is_vanilla() && self.market.market_type != MarketType::BinaryOption {
            if let Some(mark_price) = self.mark_price {
                if let Err(reason) = order.check_initial_margin_requirement_mark_price_threshold(
                    self.market.initial_margin_ratio,
                    mark_price,
                ) {
                    return Ok(Validation::Rejected(reason));
                }
            }
        }

        Ok(Validation::Accepted)
    }

    fn reject(&mut self, source: FillSource, index: usize, reason: &DerivbookError) {
        let order = self.fills(source).orders[index].clone();
        debug!(
            order = %order.hash,
            side = %self.side,
            price = %order.price,
            resting = source == FillSource::Resting,
            %reason,
            "order cancelled during matching"
        );
        self.cancelled.insert(order.hash);
        match source {
            FillSource::Resting => {
                self.resting_cancels.push(order);
                self.resting_index += 1;
            }
            FillSource::Transient => {
                self.transient_cancels.push(order);
                self.transient_index += 1;
            }
        }
        self.state = CursorState::Empty;
    }
}

impl std::fmt::Debug for DerivativeLimitOrderbook<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivativeLimitOrderbook")
            .field("market", &self.market.ticker)
            .field("side", &self.side)
            .field("state", &self.state)
            .field("resting_loaded", &self.resting.len())
            .field("transient", &self.transient.len())
            .field("cancelled", &self.cancelled.len())
            .field("total_quantity", &self.total_quantity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derivbook_persistence::ExchangeStore;

    fn d(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn market() -> DerivativeMarket {
        DerivativeMarket::btc_usdt_perp()
    }

    fn order(side: OrderSide, price: i64, qty: i64) -> DerivativeLimitOrder {
        DerivativeLimitOrder::dummy_limit(side, d(price), d(qty))
    }

    fn book<'a>(
        store: &'a ExchangeStore,
        market: &'a DerivativeMarket,
        side: OrderSide,
        transient: Vec<DerivativeLimitOrder>,
    ) -> Option<DerivativeLimitOrderbook<'a>> {
        book_with_mark(store, market, side, transient, None)
    }

    fn book_with_mark<'a>(
        store: &'a ExchangeStore,
        market: &'a DerivativeMarket,
        side: OrderSide,
        transient: Vec<DerivativeLimitOrder>,
        mark_price: Option<Decimal>,
    ) -> Option<DerivativeLimitOrderbook<'a>> {
        DerivativeLimitOrderbook::new(
            side,
            transient,
            store.resting_orders(&market.market_id, side),
            market,
            mark_price,
            None,
            store,
        )
    }

    #[test]
    fn empty_side_is_no_book() {
        let store = ExchangeStore::new();
        let market = market();
        assert!(book(&store, &market, OrderSide::Buy, vec![]).is_none());
    }

    #[test]
    fn strictly_better_transient_goes_first() {
        let mut store = ExchangeStore::new();
        store.insert_resting_order(&order(OrderSide::Buy, 100, 5)).unwrap();
        let market = market();
        let mut positions = PositionStates::new();
        let mut bids = book(&store, &market, OrderSide::Buy, vec![order(OrderSide::Buy, 101, 3)]).unwrap();

        assert_eq!(bids.peek(&mut positions).unwrap(), Some(Level::new(d(101), d(3))));
        bids.fill(d(3));
        assert_eq!(bids.peek(&mut positions).unwrap(), Some(Level::new(d(100), d(5))));
        bids.fill(d(5));
        assert_eq!(bids.peek(&mut positions).unwrap(), None);
        assert_eq!(bids.total_quantity_filled(), d(8));
        assert_eq!(bids.notional(), d(303 + 500));
        bids.close();
        assert!(bids.is_closed());
    }

    #[test]
    fn resting_wins_price_ties() {
        let mut store = ExchangeStore::new();
        store.insert_resting_order(&order(OrderSide::Sell, 50, 2)).unwrap();
        let market = market();
        let mut positions = PositionStates::new();
        let mut asks = book(&store, &market, OrderSide::Sell, vec![order(OrderSide::Sell, 50, 4)]).unwrap();

        assert_eq!(asks.peek(&mut positions).unwrap(), Some(Level::new(d(50), d(2))));
        asks.fill(d(2));
        assert_eq!(asks.peek(&mut positions).unwrap(), Some(Level::new(d(50), d(4))));
        assert_eq!(asks.resting_fills().fill_quantities, vec![d(2)]);
    }

    #[test]
    fn resting_bid_wins_price_tie() {
        let mut store = ExchangeStore::new();
        let resting = order(OrderSide::Buy, 70, 3);
        store.insert_resting_order(&resting).unwrap();
        let market = market();
        let mut positions = PositionStates::new();
        let transient = order(OrderSide::Buy, 70, 6);
        let mut bids = book(&store, &market, OrderSide::Buy, vec![transient.clone()]).unwrap();

        assert_eq!(bids.peek(&mut positions).unwrap(), Some(Level::new(d(70), d(3))));
        bids.fill(d(3));
        assert_eq!(bids.peek(&mut positions).unwrap(), Some(Level::new(d(70), d(6))));
        bids.fill(d(1));
        assert_eq!(bids.resting_fills().orders, vec![resting]);
        assert_eq!(bids.resting_fills().fill_quantities, vec![d(3)]);
        assert_eq!(bids.transient_fills().orders, vec![transient]);
        assert_eq!(bids.transient_fills().fill_quantities, vec![d(1)]);
    }

    #[test]
    fn partial_fill_keeps_order_current() {
        let store = ExchangeStore::new();
        let market = market();
        let mut positions = PositionStates::new();
        let mut asks = book(&store, &market, OrderSide::Sell, vec![order(OrderSide::Sell, 10, 5)]).unwrap();
        asks.peek(&mut positions).unwrap();
        asks.fill(d(2));
        assert_eq!(asks.peek(&mut positions).unwrap(), Some(Level::new(d(10), d(3))));
        assert_eq!(asks.transient_fills().fill_quantities, vec![d(2)]);
    }

    #[test]
    fn resting_orders_are_read_lazily() {
        let mut store = ExchangeStore::new();
        for price in [10, 11, 12, 13, 14] {
            store.insert_resting_order(&order(OrderSide::Sell, price, 1)).unwrap();
        }
        let market = market();
        let mut positions = PositionStates::new();
        let mut asks = book(&store, &market, OrderSide::Sell, vec![]).unwrap();
        assert_eq!(asks.resting_reads(), 0);
        asks.peek(&mut positions).unwrap();
        asks.peek(&mut positions).unwrap();
        assert_eq!(asks.resting_reads(), 1, "repeated peeks reuse the loaded order");
        asks.fill(Decimal::ONE);
        asks.peek(&mut positions).unwrap();
        assert_eq!(asks.resting_reads(), 2);
        assert_eq!(asks.resting_fills().len(), 2);
    }

    #[test]
    fn bankrupt_closing_order_is_cancelled_and_hidden() {
        let mut store = ExchangeStore::new();
        let market = market();
        let alice = SubaccountId::from_trader("alice", 0);
        let mut long = Position::new(true, Decimal::ZERO);
        long.apply_fill(true, d(1), d(100), d(10));
        store.set_position(&market.market_id, &alice, &long).unwrap();

        // Bankruptcy price 90: selling at 80 is below it.
        let bad = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Sell, d(80), d(1), Decimal::ZERO);
        let good = order(OrderSide::Sell, 85, 1);
        store.insert_resting_order(&bad).unwrap();
        store.insert_resting_order(&good).unwrap();

        let mut positions = PositionStates::new();
        let mut asks = book(&store, &market, OrderSide::Sell, vec![]).unwrap();
        assert_eq!(asks.peek(&mut positions).unwrap(), Some(Level::new(d(85), d(1))));
        assert_eq!(asks.resting_cancels(), &[bad.clone()]);
        assert!(asks.transient_cancels().is_empty());
        assert!(asks.is_cancelled(&bad.hash));
        assert_eq!(asks.resting_fills().orders, vec![good]);
        assert!(positions.contains(&alice));
    }

    #[test]
    fn insufficient_margin_transient_is_cancelled() {
        let store = ExchangeStore::new();
        let market = market();
        // Buy 1 @ 100 with 1 margin: threshold (1 - 100) / (-0.95) ~= 104.2 > mark 100.
        let thin = DerivativeLimitOrder::dummy_limit_for(
            SubaccountId::from_trader("bob", 0),
            OrderSide::Buy,
            d(100),
            d(1),
            d(1),
        );
        let fine = order(OrderSide::Buy, 99, 2);
        let mut positions = PositionStates::new();
        let mut bids = book_with_mark(
            &store,
            &market,
            OrderSide::Buy,
            vec![thin.clone(), fine.clone()],
            Some(d(100)),
        )
        .unwrap();

        assert_eq!(bids.peek(&mut positions).unwrap(), Some(Level::new(d(99), d(2))));
        assert_eq!(bids.transient_cancels(), &[thin]);
        assert_eq!(bids.transient_fills().orders, vec![fine]);
    }

    #[test]
    fn missing_mark_price_skips_margin_threshold() {
        let store = ExchangeStore::new();
        let market = market();
        let thin = DerivativeLimitOrder::dummy_limit_for(
            SubaccountId::from_trader("bob", 0),
            OrderSide::Buy,
            d(100),
            d(1),
            d(1),
        );
        let mut positions = PositionStates::new();
        let mut bids = book(&store, &market, OrderSide::Buy, vec![thin]).unwrap();
        assert!(bids.peek(&mut positions).unwrap().is_some());
        assert!(bids.transient_cancels().is_empty());
    }

    #[test]
    fn new_positions_start_at_current_funding() {
        let store = ExchangeStore::new();
        let market = market();
        let funding = PerpetualMarketFunding {
            cumulative_funding: d(7),
        };
        let o = order(OrderSide::Buy, 10, 1);
        let mut positions = PositionStates::new();
        let mut bids = DerivativeLimitOrderbook::new(
            OrderSide::Buy,
            vec![o.clone()],
            store.resting_orders(&market.market_id, OrderSide::Buy),
            &market,
            Some(d(10)),
            Some(funding),
            &store,
        )
        .unwrap();
        bids.peek(&mut positions).unwrap();
        let state = positions.get(&o.subaccount_id).unwrap();
        assert_eq!(state.position.cumulative_funding_entry, d(7));
        assert!(state.position.is_empty());
    }

    #[test]
    fn corrupted_resting_order_fails_peek() {
        let mut store = ExchangeStore::new();
        let o = order(OrderSide::Buy, 10, 1);
        let key = derivbook_persistence::keys::resting_order_key(&o.market_id, o.side, o.price, &o.hash).unwrap();
        store.durable_mut().set(key, b"\x00garbage".to_vec());
        let market = market();
        let mut positions = PositionStates::new();
        let mut bids = book(&store, &market, OrderSide::Buy, vec![]).unwrap();
        assert!(matches!(
            bids.peek(&mut positions),
            Err(DerivbookError::CorruptedState { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "without a fillable order")]
    fn fill_before_peek_panics() {
        let store = ExchangeStore::new();
        let market = market();
        let mut bids = book(&store, &market, OrderSide::Buy, vec![order(OrderSide::Buy, 1, 1)]).unwrap();
        bids.fill(Decimal::ONE);
    }

    #[test]
    #[should_panic(expected = "exceeds remaining")]
    fn overfill_panics() {
        let store = ExchangeStore::new();
        let market = market();
        let mut positions = PositionStates::new();
        let mut bids = book(&store, &market, OrderSide::Buy, vec![order(OrderSide::Buy, 1, 1)]).unwrap();
        bids.peek(&mut positions).unwrap();
        bids.fill(d(2));
    }
}
