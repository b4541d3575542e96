//! Cancelling resting orders outside of matching.

use derivbook_persistence::ExchangeStore;
use derivbook_types::{DerivativeLimitOrder, DerivbookError, MarketId, OrderHash, Result};
use tracing::debug;

/// Cancel a resting order by hash: delete it and take its unfilled
/// quantity off its price level. Returns the removed order.
///
/// # Errors
/// `OrderNotFound` if no such resting order exists; storage errors.
pub fn cancel_resting_order(
    store: &mut ExchangeStore,
    market_id: &MarketId,
    hash: &OrderHash,
) -> Result<DerivativeLimitOrder> {
    let order = store
        .get_resting_order(market_id, hash)?
        .ok_or(DerivbookError::OrderNotFound(*hash))?;
    store.remove_resting_order(&order)?;
    debug!(
        order = %order.hash,
        side = %order.side,
        price = %order.price,
        fillable = %order.fillable,
        "resting order cancelled"
    );
    Ok(order)
}
