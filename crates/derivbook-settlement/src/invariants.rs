//! Diagnostic consistency checks over persisted market state.
//!
//! ```text
//! ∀ (market, side, price): level(price) == Σ fillable of resting orders at price
//! ∀ market: Σ long qty == Σ short qty == open_interest(market)
//! ```
//!
//! These run in tests and diagnostics only. They log every violation and
//! return `false`; they never abort execution.

use std::collections::BTreeMap;

use derivbook_persistence::{ExchangeStore, LevelsLimit};
use derivbook_types::{MarketId, OrderSide};
use rust_decimal::Decimal;
use tracing::error;

/// Price levels of both sides agree with the resting orders.
#[must_use]
pub fn check_aggregate_volumes(store: &ExchangeStore, market_id: &MarketId) -> bool {
    let mut consistent = true;
    for side in [OrderSide::Buy, OrderSide::Sell] {
        let orders = match store.resting_orders_vec(market_id, side) {
            Ok(orders) => orders,
            Err(err) => {
                error!(market = %market_id, %side, %err, "resting orders unreadable");
                return false;
            }
        };
        let levels = match store.get_levels(market_id, side, LevelsLimit::Unlimited) {
            Ok(levels) => levels,
            Err(err) => {
                error!(market = %market_id, %side, %err, "price levels unreadable");
                return false;
            }
        };

        let mut expected: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for order in &orders {
            *expected.entry(order.price.normalize()).or_insert(Decimal::ZERO) += order.fillable;
        }
        let actual: BTreeMap<Decimal, Decimal> = levels
            .iter()
            .map(|level| (level.price.normalize(), level.quantity))
            .collect();

        if expected != actual {
            error!(
                market = %market_id,
                %side,
                expected = ?expected,
                actual = ?actual,
                "aggregate volume mismatch"
            );
            consistent = false;
        }
    }
    consistent
}

/// Long and short positions balance and match the stored open interest.
#[must_use]
pub fn check_open_interest(store: &ExchangeStore, market_id: &MarketId) -> bool {
    let calculated = match store.calculate_open_interest(market_id) {
        Ok(calculated) => calculated,
        Err(err) => {
            error!(market = %market_id, %err, "open interest inconsistent");
            return false;
        }
    };
    let stored = match store.open_interest(market_id) {
        Ok(stored) => stored,
        Err(err) => {
            error!(market = %market_id, %err, "open interest unreadable");
            return false;
        }
    };
    if calculated != stored {
        error!(
            market = %market_id,
            %calculated,
            %stored,
            "open interest mismatch"
        );
        return false;
    }
    true
}

/// Both checks for one market.
#[must_use]
pub fn check_market_invariants(store: &ExchangeStore, market_id: &MarketId) -> bool {
    let volumes = check_aggregate_volumes(store, market_id);
    let open_interest = check_open_interest(store, market_id);
    volumes && open_interest
}
