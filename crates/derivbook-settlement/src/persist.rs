//! Persisting a matching outcome.
//!
//! Applied once per market after matching, in this order:
//! 1. Resting orders cancelled during matching are deleted and their
//!    quantity taken off their price levels
//! 2. Each side's fills are walked in merged priority order:
//!    - resting fills shrink or delete the order and its level
//!    - transient orders with quantity left become resting orders
//!    - every filled owner's position is netted at the clearing price
//! 3. Open interest moves by the change in total long quantity

use derivbook_matchcore::{BookOutcome, DerivativeMatchingOutcome, OrderbookFill};
use derivbook_persistence::{ExchangeStore, PositionKeeper};
use derivbook_types::{DerivbookError, MarketId, PerpetualMarketFunding, Position, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// What persisting one outcome changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementSummary {
    /// Orders with a non-zero fill.
    pub filled_orders: usize,
    /// Resting orders removed because they were completely filled.
    pub completed_orders: usize,
    /// Transient orders that now rest on the book.
    pub new_resting_orders: usize,
    /// Resting and transient orders cancelled during matching.
    pub cancelled_orders: usize,
    pub open_interest_delta: Decimal,
}

fn long_quantity(position: &Position) -> Decimal {
    if position.is_long {
        position.quantity
    } else {
        Decimal::ZERO
    }
}

/// Net `fill` into its owner's position. Returns the change in the owner's
/// long quantity.
fn settle_position(
    store: &mut ExchangeStore,
    market_id: &MarketId,
    fill: &OrderbookFill<'_>,
    clearing_price: Decimal,
    funding: Option<&PerpetualMarketFunding>,
) -> Result<Decimal> {
    let order = fill.order;
    let mut position = store
        .get_position(market_id, &order.subaccount_id)?
        .unwrap_or_else(|| {
            Position::new(order.is_buy(), funding.map_or(Decimal::ZERO, |f| f.cumulative_funding))
        });
    position.apply_funding(funding);
    let long_before = long_quantity(&position);

    let result = position.apply_fill(
        order.is_buy(),
        fill.fill_quantity,
        clearing_price,
        order.margin_for(fill.fill_quantity),
    );
    debug!(
        subaccount = %order.subaccount_id,
        quantity = %fill.fill_quantity,
        price = %clearing_price,
        closed = %result.closed_quantity,
        pnl = %result.realized_pnl,
        "position updated"
    );
    store.set_position(market_id, &order.subaccount_id, &position)?;
    Ok(long_quantity(&position) - long_before)
}

fn settle_book(
    store: &mut ExchangeStore,
    market_id: &MarketId,
    book: &BookOutcome,
    clearing_price: Option<Decimal>,
    funding: Option<&PerpetualMarketFunding>,
    summary: &mut SettlementSummary,
) -> Result<()> {
    for order in &book.resting_cancels {
        store.remove_resting_order(order)?;
    }
    summary.cancelled_orders += book.cancel_count();

    for fill in book.merged_fills() {
        let order = fill.order;
        let remaining = order.fillable - fill.fill_quantity;

        if fill.is_transient {
            if remaining > Decimal::ZERO {
                let mut resting = order.clone();
                resting.fillable = remaining;
                store.insert_resting_order(&resting)?;
                summary.new_resting_orders += 1;
            }
        } else if fill.fill_quantity > Decimal::ZERO {
            if remaining.is_zero() {
                store.delete_resting_order(order)?;
                summary.completed_orders += 1;
            } else {
                let mut updated = order.clone();
                updated.fillable = remaining;
                store.set_resting_order(&updated)?;
            }
            store.decrement_price_level_quantity(market_id, order.side, order.price, fill.fill_quantity)?;
        }

        if fill.fill_quantity > Decimal::ZERO {
            let price = clearing_price.ok_or_else(|| DerivbookError::MatchingFailed {
                reason: format!("order {} filled without a clearing price", order.hash),
            })?;
            summary.open_interest_delta += settle_position(store, market_id, &fill, price, funding)?;
            summary.filled_orders += 1;
        }
    }
    Ok(())
}

/// Write `outcome` into `store`.
///
/// `funding` is the market's current cumulative funding, `None` for markets
/// without funding.
///
/// # Errors
/// Storage failures. The block must abort; the store is left partially
/// written.
pub fn persist_matching_outcome(
    store: &mut ExchangeStore,
    outcome: &DerivativeMatchingOutcome,
    funding: Option<PerpetualMarketFunding>,
) -> Result<SettlementSummary> {
    let mut summary = SettlementSummary::default();
    let market_id = outcome.market_id;

    for book in [&outcome.buys, &outcome.sells] {
        settle_book(
            store,
            &market_id,
            book,
            outcome.clearing_price,
            funding.as_ref(),
            &mut summary,
        )?;
    }
    store.apply_open_interest_delta(&market_id, summary.open_interest_delta)?;

    info!(
        market = %market_id,
        filled = summary.filled_orders,
        new_resting = summary.new_resting_orders,
        cancelled = summary.cancelled_orders,
        open_interest_delta = %summary.open_interest_delta,
        "matching outcome persisted"
    );
    Ok(summary)
}
