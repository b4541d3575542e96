//! Matching driver for one derivative market.
//!
//! ## Algorithm
//!
//! 1. Open a buy book and a sell book over the resting index and this
//!    block's transient orders. Both share one [`PositionStates`] table.
//! 2. Repeatedly peek the best bid and ask. Stop when either side is empty,
//!    the spread is positive, or the matchable quantity is zero.
//! 3. Fill `min(bid, ask)` on both sides.
//! 4. Derive the clearing price (see [`crate::clearing`]) and collect each
//!    book's fills and cancellations into a [`DerivativeMatchingOutcome`].
//!
//! The driver writes nothing; persisting the outcome is settlement's job.

use derivbook_persistence::ExchangeStore;
use derivbook_types::{
    DerivativeLimitOrder, DerivativeMarket, MarketId, OrderSide, PerpetualMarketFunding,
    PositionStates, Result,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::clearing::clearing_price_from_matching;
use crate::determinism::compute_outcome_root;
use crate::fills::OrderbookFills;
use crate::merge::MergedOrderbookFills;
use crate::orderbook::DerivativeLimitOrderbook;

/// What one side of the market produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookOutcome {
    pub side: OrderSide,
    pub resting_fills: OrderbookFills,
    pub transient_fills: OrderbookFills,
    pub resting_cancels: Vec<DerivativeLimitOrder>,
    pub transient_cancels: Vec<DerivativeLimitOrder>,
    pub notional: Decimal,
    pub total_quantity: Decimal,
}

impl BookOutcome {
    /// Outcome of a side that had no book at all.
    #[must_use]
    pub fn untouched(side: OrderSide) -> Self {
        Self {
            side,
            resting_fills: OrderbookFills::default(),
            transient_fills: OrderbookFills::default(),
            resting_cancels: Vec::new(),
            transient_cancels: Vec::new(),
            notional: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
        }
    }

    /// Close `book` and collect what it produced.
    fn collect(mut book: DerivativeLimitOrderbook<'_>) -> Self {
        book.close();
        Self {
            side: book.side(),
            resting_fills: book.resting_fills(),
            transient_fills: book.transient_fills(),
            resting_cancels: book.resting_cancels().to_vec(),
            transient_cancels: book.transient_cancels().to_vec(),
            notional: book.notional(),
            total_quantity: book.total_quantity_filled(),
        }
    }

    /// Resting and transient fills interleaved in priority order.
    #[must_use]
    pub fn merged_fills(&self) -> MergedOrderbookFills<'_> {
        MergedOrderbookFills::new(self.side, &self.resting_fills, &self.transient_fills)
    }

    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.resting_cancels.len() + self.transient_cancels.len()
    }
}

/// Result of matching one market for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeMatchingOutcome {
    pub market_id: MarketId,
    /// Uniform trade price; `None` when nothing matched.
    pub clearing_price: Option<Decimal>,
    pub clearing_quantity: Decimal,
    pub buys: BookOutcome,
    pub sells: BookOutcome,
}

impl DerivativeMatchingOutcome {
    #[must_use]
    pub fn has_trades(&self) -> bool {
        self.clearing_quantity > Decimal::ZERO
    }

    /// Deterministic digest of the outcome for cross-node comparison.
    #[must_use]
    pub fn root(&self) -> [u8; 32] {
        compute_outcome_root(self)
    }
}

fn open_book<'a>(
    store: &'a ExchangeStore,
    market: &'a DerivativeMarket,
    side: OrderSide,
    transient_orders: Vec<DerivativeLimitOrder>,
    mark_price: Option<Decimal>,
    funding: Option<PerpetualMarketFunding>,
) -> Option<DerivativeLimitOrderbook<'a>> {
    DerivativeLimitOrderbook::new(
        side,
        transient_orders,
        store.resting_orders(&market.market_id, side),
        market,
        mark_price,
        funding,
        store,
    )
}

/// Match this block's transient orders against each other and the resting
/// book of `market`.
///
/// `transient_buys` and `transient_sells` must already be priority sorted
/// (see the ingress transient buffer). `funding` is `None` for markets
/// without funding.
///
/// # Errors
/// Storage decode failures; the block must abort.
pub fn match_limit_orders(
    store: &ExchangeStore,
    market: &DerivativeMarket,
    transient_buys: Vec<DerivativeLimitOrder>,
    transient_sells: Vec<DerivativeLimitOrder>,
    mark_price: Option<Decimal>,
    funding: Option<PerpetualMarketFunding>,
) -> Result<DerivativeMatchingOutcome> {
    let funding = if market.market_type.has_funding() {
        funding
    } else {
        None
    };
    let mut positions = PositionStates::new();
    let mut buy_book = open_book(store, market, OrderSide::Buy, transient_buys, mark_price, funding);
    let mut sell_book = open_book(store, market, OrderSide::Sell, transient_sells, mark_price, funding);

    let mut clearing_quantity = Decimal::ZERO;
    let mut clearing_price = None;

    if let (Some(buys), Some(sells)) = (buy_book.as_mut(), sell_book.as_mut()) {
        let mut last_buy = Decimal::ZERO;
        let mut last_sell = Decimal::ZERO;

        loop {
            let Some(bid) = buys.peek(&mut positions)? else {
                break;
            };
            let Some(ask) = sells.peek(&mut positions)? else {
                break;
            };
            let quantity = bid.quantity.min(ask.quantity);
            if ask.price > bid.price || quantity.is_zero() {
                break;
            }

            last_buy = bid.price;
            last_sell = ask.price;
            buys.fill(quantity);
            sells.fill(quantity);
            debug!(bid = %bid.price, ask = %ask.price, %quantity, "matched");
        }

        clearing_quantity = buys.total_quantity_filled();
        if clearing_quantity > Decimal::ZERO {
            let mid_price = store.mid_price_or_best_price(&market.market_id)?;
            clearing_price = Some(clearing_price_from_matching(
                last_buy, last_sell, mark_price, mid_price,
            ));
        }
    }

    let buys = buy_book.map_or_else(|| BookOutcome::untouched(OrderSide::Buy), BookOutcome::collect);
    let sells = sell_book.map_or_else(|| BookOutcome::untouched(OrderSide::Sell), BookOutcome::collect);

    info!(
        market = %market.ticker,
        clearing_quantity = %clearing_quantity,
        clearing_price = ?clearing_price,
        cancels = buys.cancel_count() + sells.cancel_count(),
        "limit orders matched"
    );

    Ok(DerivativeMatchingOutcome {
        market_id: market.market_id,
        clearing_price,
        clearing_quantity,
        buys,
        sells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use derivbook_types::{Position, SubaccountId};

    fn d(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn order(side: OrderSide, price: i64, qty: i64) -> DerivativeLimitOrder {
        DerivativeLimitOrder::dummy_limit(side, d(price), d(qty))
    }

    #[test]
    fn nothing_to_match() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let outcome = match_limit_orders(&store, &market, vec![], vec![], None, None).unwrap();
        assert!(!outcome.has_trades());
        assert_eq!(outcome.clearing_price, None);
        assert_eq!(outcome.buys, BookOutcome::untouched(OrderSide::Buy));
        assert_eq!(outcome.sells, BookOutcome::untouched(OrderSide::Sell));
    }

    #[test]
    fn one_sided_transients_pass_through_unfilled() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let bid = order(OrderSide::Buy, 100, 2);
        let outcome =
            match_limit_orders(&store, &market, vec![bid.clone()], vec![], None, None).unwrap();
        assert!(!outcome.has_trades());
        assert_eq!(outcome.buys.transient_fills.orders, vec![bid]);
        assert_eq!(outcome.buys.transient_fills.fill_quantities, vec![Decimal::ZERO]);
    }

    #[test]
    fn crossing_transients_match_at_midpoint_without_references() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let outcome = match_limit_orders(
            &store,
            &market,
            vec![order(OrderSide::Buy, 102, 3)],
            vec![order(OrderSide::Sell, 98, 2)],
            None,
            None,
        )
        .unwrap();
        assert_eq!(outcome.clearing_quantity, d(2));
        assert_eq!(outcome.clearing_price, Some(d(100)));
        assert_eq!(outcome.buys.transient_fills.fill_quantities, vec![d(2)]);
        assert_eq!(outcome.sells.transient_fills.fill_quantities, vec![d(2)]);
        assert_eq!(outcome.buys.notional, d(204));
        assert_eq!(outcome.sells.notional, d(196));
    }

    #[test]
    fn positive_spread_stops_matching() {
        let mut store = ExchangeStore::new();
        store.insert_resting_order(&order(OrderSide::Sell, 105, 1)).unwrap();
        let market = DerivativeMarket::btc_usdt_perp();
        let outcome = match_limit_orders(
            &store,
            &market,
            vec![order(OrderSide::Buy, 100, 1)],
            vec![],
            None,
            None,
        )
        .unwrap();
        assert!(!outcome.has_trades());
        assert_eq!(outcome.sells.resting_fills.fill_quantities, vec![Decimal::ZERO]);
    }

    #[test]
    fn walks_multiple_levels_and_uses_resting_mid() {
        let mut store = ExchangeStore::new();
        store.insert_resting_order(&order(OrderSide::Sell, 101, 1)).unwrap();
        store.insert_resting_order(&order(OrderSide::Sell, 103, 1)).unwrap();
        store.insert_resting_order(&order(OrderSide::Buy, 95, 1)).unwrap();
        let market = DerivativeMarket::btc_usdt_perp();
        let outcome = match_limit_orders(
            &store,
            &market,
            vec![order(OrderSide::Buy, 104, 3)],
            vec![],
            None,
            None,
        )
        .unwrap();
        // Buys 1 @ 101 and 1 @ 103, third unit rests.
        assert_eq!(outcome.clearing_quantity, d(2));
        // Mid of resting book = (95 + 101) / 2 = 98; last buy 104 > 98,
        // last sell 103 >= 98 -> last sell.
        assert_eq!(outcome.clearing_price, Some(d(103)));
        assert_eq!(outcome.sells.resting_fills.fill_quantities, vec![d(1), d(1)]);
        assert_eq!(outcome.buys.transient_fills.fill_quantities, vec![d(2)]);
        // The resting bid at 95 was never needed.
        assert!(outcome.buys.resting_fills.orders.len() <= 1);
    }

    #[test]
    fn positions_are_shared_across_both_books() {
        let mut store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let alice = SubaccountId::from_trader("alice", 0);
        let mut short = Position::new(false, Decimal::ZERO);
        short.apply_fill(false, d(1), d(100), d(10));
        store.set_position(&market.market_id, &alice, &short).unwrap();

        // Alice closes her short by buying; the bankruptcy bound is 110.
        let closing = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Buy, d(100), d(1), Decimal::ZERO);
        let outcome = match_limit_orders(
            &store,
            &market,
            vec![closing.clone()],
            vec![order(OrderSide::Sell, 100, 1)],
            Some(d(100)),
            None,
        )
        .unwrap();
        assert_eq!(outcome.clearing_quantity, d(1));
        assert!(outcome.buys.transient_cancels.is_empty());
        assert_eq!(outcome.buys.transient_fills.orders, vec![closing]);
    }

    #[test]
    fn root_is_stable() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let buys = vec![order(OrderSide::Buy, 102, 3)];
        let sells = vec![order(OrderSide::Sell, 98, 2)];
        let a = match_limit_orders(&store, &market, buys.clone(), sells.clone(), None, None).unwrap();
        let b = match_limit_orders(&store, &market, buys, sells, None, None).unwrap();
        assert_eq!(a.root(), b.root());
    }
}
