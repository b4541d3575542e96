//! Acceptance checks for new derivative limit orders.
//!
//! Every order passes through the validator before it is buffered for the
//! block. The matcher re-checks margin lazily when the order reaches the
//! top of its book; these checks reject what is already known to be bad.
//!
//! - **Shape**: positive price and quantity, non-negative margin
//! - **Reduce-only**: needs an opposite position to reduce
//! - **Closing**: must not trade past the position's bankruptcy price
//! - **Vanilla**: enough margin at the mark price, within the notional cap

use derivbook_persistence::{ExchangeStore, PositionKeeper};
use derivbook_types::{
    DerivativeLimitOrder, DerivativeMarket, DerivbookError, MarketType, PerpetualMarketFunding,
    Position, Result,
};
use rust_decimal::Decimal;
use tracing::debug;

use crate::notional_cap::check_open_notional_cap;

/// Validates new orders for one market against the state at block start.
#[derive(Debug, Clone)]
pub struct OrderValidator<'a> {
    market: &'a DerivativeMarket,
    mark_price: Option<Decimal>,
    funding: Option<PerpetualMarketFunding>,
}

impl<'a> OrderValidator<'a> {
    #[must_use]
    pub fn new(
        market: &'a DerivativeMarket,
        mark_price: Option<Decimal>,
        funding: Option<PerpetualMarketFunding>,
    ) -> Self {
        let funding = if market.market_type.has_funding() {
            funding
        } else {
            None
        };
        Self {
            market,
            mark_price,
            funding,
        }
    }

    /// Run every acceptance check.
    ///
    /// # Errors
    /// The first check that fails. Storage errors pass through unchanged.
    pub fn validate(&self, store: &ExchangeStore, order: &DerivativeLimitOrder) -> Result<()> {
        self.check_shape(order)?;

        let position = store
            .get_position(&self.market.market_id, &order.subaccount_id)?
            .map(|mut position| {
                position.apply_funding(self.funding.as_ref());
                position
            })
            .filter(|position| !position.is_empty());

        if order.is_reduce_only() {
            Self::check_reduce_only(order, position.as_ref(), self.market)?;
        }
        if let Some(position) = position.as_ref().filter(|p| p.is_closed_by(order.is_buy())) {
            self.check_closing(order, position)?;
        }
        if order.is_vanilla() {
            self.check_vanilla(store, order, position.as_ref())?;
        }

        debug!(order = %order.hash, market = %self.market.ticker, "order accepted");
        Ok(())
    }

    fn check_shape(&self, order: &DerivativeLimitOrder) -> Result<()> {
        if order.market_id != self.market.market_id {
            return Err(DerivbookError::MarketMismatch {
                expected: self.market.market_id,
                actual: order.market_id,
            });
        }
        if order.price <= Decimal::ZERO {
            return Err(DerivbookError::InvalidOrder {
                reason: format!("price must be positive, got {}", order.price),
            });
        }
        if order.quantity <= Decimal::ZERO {
            return Err(DerivbookError::InvalidOrder {
                reason: format!("quantity must be positive, got {}", order.quantity),
            });
        }
        if order.fillable <= Decimal::ZERO || order.fillable > order.quantity {
            return Err(DerivbookError::InvalidOrder {
                reason: format!("fillable {} outside (0, {}]", order.fillable, order.quantity),
            });
        }
        if order.margin.is_sign_negative() {
            return Err(DerivbookError::InvalidOrder {
                reason: format!("margin must not be negative, got {}", order.margin),
            });
        }
        Ok(())
    }

    fn check_reduce_only(
        order: &DerivativeLimitOrder,
        position: Option<&Position>,
        market: &DerivativeMarket,
    ) -> Result<()> {
        let Some(position) = position else {
            return Err(DerivbookError::PositionNotFound(market.market_id));
        };
        if !position.is_closed_by(order.is_buy()) {
            return Err(DerivbookError::InvalidReduceDirection);
        }
        Ok(())
    }

    fn check_closing(&self, order: &DerivativeLimitOrder, position: &Position) -> Result<()> {
        let closing_quantity = order.quantity.min(position.quantity);
        position.check_valid_position_to_reduce(
            self.market.market_type,
            order.price,
            order.is_buy(),
            self.market.taker_fee_rate,
            self.funding.as_ref(),
            order.margin_for(closing_quantity),
        )
    }

    fn check_vanilla(
        &self,
        store: &ExchangeStore,
        order: &DerivativeLimitOrder,
        position: Option<&Position>,
    ) -> Result<()> {
        if self.market.market_type == MarketType::BinaryOption {
            return Ok(());
        }
        let Some(mark_price) = self.mark_price else {
            return Ok(());
        };
        order.check_initial_margin_requirement_mark_price_threshold(
            self.market.initial_margin_ratio,
            mark_price,
        )?;

        let open_interest = store.open_interest(&self.market.market_id)?;
        check_open_notional_cap(
            order.side,
            order.quantity,
            mark_price,
            open_interest * mark_price,
            position.map_or(Decimal::ZERO, Position::signed_quantity),
            &self.market.open_notional_cap,
        )
    }
}

#[cfg(test)]
mod tests {
    use derivbook_types::{OpenNotionalCap, OrderSide, SubaccountId};

    use super::*;

    fn d(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn long_position(store: &mut ExchangeStore, market: &DerivativeMarket, who: SubaccountId, qty: i64) {
        let mut position = Position::new(true, Decimal::ZERO);
        position.apply_fill(true, d(qty), d(100), d(10 * qty));
        store.set_position(&market.market_id, &who, &position).unwrap();
    }

    #[test]
    fn plain_order_passes() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let validator = OrderValidator::new(&market, Some(d(100)), None);
        let order = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(100), d(1));
        assert!(validator.validate(&store, &order).is_ok());
    }

    #[test]
    fn bad_shapes_rejected() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let validator = OrderValidator::new(&market, None, None);

        let mut zero_qty = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(100), d(1));
        zero_qty.quantity = Decimal::ZERO;
        assert!(matches!(
            validator.validate(&store, &zero_qty).unwrap_err(),
            DerivbookError::InvalidOrder { .. }
        ));

        let mut negative_price = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(100), d(1));
        negative_price.price = d(-1);
        assert!(validator.validate(&store, &negative_price).is_err());

        let mut negative_margin = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(100), d(1));
        negative_margin.margin = d(-1);
        assert!(validator.validate(&store, &negative_margin).is_err());

        let mut other_market = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(100), d(1));
        other_market.market_id = DerivativeMarket::eth_usdt_expiry().market_id;
        assert!(matches!(
            validator.validate(&store, &other_market).unwrap_err(),
            DerivbookError::MarketMismatch { .. }
        ));
    }

    #[test]
    fn reduce_only_needs_opposite_position() {
        let mut store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let validator = OrderValidator::new(&market, None, None);
        let alice = SubaccountId::from_trader("alice", 0);

        let sell = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Sell, d(100), d(1), Decimal::ZERO);
        assert!(matches!(
            validator.validate(&store, &sell).unwrap_err(),
            DerivbookError::PositionNotFound(_)
        ));

        long_position(&mut store, &market, alice, 2);
        assert!(validator.validate(&store, &sell).is_ok());

        let buy = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Buy, d(100), d(1), Decimal::ZERO);
        assert!(matches!(
            validator.validate(&store, &buy).unwrap_err(),
            DerivbookError::InvalidReduceDirection
        ));
    }

    #[test]
    fn closing_below_bankruptcy_rejected() {
        let mut store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let validator = OrderValidator::new(&market, None, None);
        let alice = SubaccountId::from_trader("alice", 0);
        // Long 1 @ 100 with margin 10: bankruptcy at 90.
        long_position(&mut store, &market, alice, 1);

        let too_low = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Sell, d(85), d(1), Decimal::ZERO);
        assert!(matches!(
            validator.validate(&store, &too_low).unwrap_err(),
            DerivbookError::PriceSurpassesBankruptcyPrice { .. }
        ));
        let fine = DerivativeLimitOrder::dummy_limit_for(alice, OrderSide::Sell, d(95), d(1), Decimal::ZERO);
        assert!(validator.validate(&store, &fine).is_ok());
    }

    #[test]
    fn thin_margin_rejected_at_mark() {
        let store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp();
        let bob = SubaccountId::from_trader("bob", 0);
        // Buy 1 @ 100 with margin 5: threshold (5 - 100) / (0.05 - 1) = 100.
        let order = DerivativeLimitOrder::dummy_limit_for(bob, OrderSide::Buy, d(100), d(1), d(5));
        assert!(OrderValidator::new(&market, Some(d(100)), None).validate(&store, &order).is_ok());
        assert!(matches!(
            OrderValidator::new(&market, Some(d(99)), None)
                .validate(&store, &order)
                .unwrap_err(),
            DerivbookError::InsufficientOrderMargin { .. }
        ));
        // Without a mark price the check is skipped.
        assert!(OrderValidator::new(&market, None, None).validate(&store, &order).is_ok());
    }

    #[test]
    fn cap_uses_open_interest_at_mark() {
        let mut store = ExchangeStore::new();
        let market = DerivativeMarket::btc_usdt_perp()
            .with_open_notional_cap(OpenNotionalCap::Capped { value: d(1000) });
        store.set_open_interest(&market.market_id, d(90));
        let validator = OrderValidator::new(&market, Some(d(10)), None);

        let opening = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(10), d(15));
        assert!(matches!(
            validator.validate(&store, &opening).unwrap_err(),
            DerivbookError::OpenNotionalCapBreached { .. }
        ));
        let small = DerivativeLimitOrder::dummy_limit(OrderSide::Buy, d(10), d(10));
        assert!(validator.validate(&store, &small).is_ok());
    }
}
