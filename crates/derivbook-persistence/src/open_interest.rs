//! Per-market open interest.
//!
//! Stored as the total long quantity of the market, which equals the total
//! short quantity whenever the books are consistent.

use derivbook_types::{DerivbookError, MarketId, Result};
use rust_decimal::Decimal;

use crate::keys;
use crate::store::{ExchangeStore, decode_decimal, encode_decimal};

impl ExchangeStore {
    pub fn open_interest(&self, market_id: &MarketId) -> Result<Decimal> {
        self.durable
            .get(&keys::open_interest_key(market_id))
            .map_or(Ok(Decimal::ZERO), |bytes| {
                decode_decimal(bytes, "open interest")
            })
    }

    pub fn set_open_interest(&mut self, market_id: &MarketId, quantity: Decimal) {
        let key = keys::open_interest_key(market_id);
        if quantity.is_zero() {
            self.durable.delete(&key);
        } else {
            self.durable.set(key, encode_decimal(quantity));
        }
    }

    pub fn apply_open_interest_delta(&mut self, market_id: &MarketId, delta: Decimal) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let updated = self.open_interest(market_id)? + delta;
        self.set_open_interest(market_id, updated);
        Ok(())
    }

    /// Recompute open interest from positions.
    ///
    /// # Errors
    /// `NegativePositionQuantity` or `OpenInterestMismatch` when the
    /// positions are inconsistent.
    pub fn calculate_open_interest(&self, market_id: &MarketId) -> Result<Decimal> {
        let mut long = Decimal::ZERO;
        let mut short = Decimal::ZERO;
        for (_, position) in self.positions_by_market(market_id)? {
            if position.quantity.is_sign_negative() && !position.quantity.is_zero() {
                return Err(DerivbookError::NegativePositionQuantity(*market_id));
            }
            if position.is_long {
                long += position.quantity;
            } else {
                short += position.quantity;
            }
        }
        if long != short {
            return Err(DerivbookError::OpenInterestMismatch {
                market: *market_id,
                long,
                short,
            });
        }
        Ok(long)
    }
}
