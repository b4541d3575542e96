//! Persisted positions.

use derivbook_types::{MarketId, Position, Result, SubaccountId};

use crate::keys;
use crate::store::{ExchangeStore, decode_json, encode_json};

/// Read access to positions, as needed by the matcher to validate orders.
pub trait PositionKeeper {
    fn get_position(
        &self,
        market_id: &MarketId,
        subaccount_id: &SubaccountId,
    ) -> Result<Option<Position>>;
}

impl PositionKeeper for ExchangeStore {
    fn get_position(
        &self,
        market_id: &MarketId,
        subaccount_id: &SubaccountId,
    ) -> Result<Option<Position>> {
        self.durable
            .get(&keys::position_key(market_id, subaccount_id))
            .map(|bytes| decode_json(bytes, "position"))
            .transpose()
    }
}

impl ExchangeStore {
    /// Write a position. Empty positions are deleted.
    pub fn set_position(
        &mut self,
        market_id: &MarketId,
        subaccount_id: &SubaccountId,
        position: &Position,
    ) -> Result<()> {
        let key = keys::position_key(market_id, subaccount_id);
        if position.is_empty() {
            self.durable.delete(&key);
        } else {
            self.durable.set(key, encode_json(position)?);
        }
        Ok(())
    }

    /// All positions of a market, in subaccount order.
    pub fn positions_by_market(&self, market_id: &MarketId) -> Result<Vec<(SubaccountId, Position)>> {
        let prefix = keys::positions_prefix(market_id);
        self.durable
            .prefix_range(&prefix)
            .map(|(key, value)| {
                let raw: [u8; 32] = key[prefix.len()..].try_into().map_err(|_| {
                    derivbook_types::DerivbookError::MalformedKey {
                        reason: "position key: subaccount".into(),
                    }
                })?;
                Ok((SubaccountId(raw), decode_json(value, "position")?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn set_get_and_delete_on_empty() {
        let mut store = ExchangeStore::new();
        let market = MarketId::from_ticker("BTC/USDT PERP");
        let sub = SubaccountId::from_trader("alice", 0);
        assert!(store.get_position(&market, &sub).unwrap().is_none());

        let mut position = Position::new(true, Decimal::ZERO);
        position.apply_fill(true, Decimal::new(2, 0), Decimal::new(100, 0), Decimal::new(20, 0));
        store.set_position(&market, &sub, &position).unwrap();
        assert_eq!(store.get_position(&market, &sub).unwrap(), Some(position.clone()));
        assert_eq!(store.positions_by_market(&market).unwrap(), vec![(sub, position)]);

        store
            .set_position(&market, &sub, &Position::new(true, Decimal::ZERO))
            .unwrap();
        assert!(store.get_position(&market, &sub).unwrap().is_none());
    }

    #[test]
    fn markets_are_isolated() {
        let mut store = ExchangeStore::new();
        let a = MarketId::from_ticker("A");
        let b = MarketId::from_ticker("B");
        let sub = SubaccountId::from_trader("alice", 0);
        let mut position = Position::new(false, Decimal::ZERO);
        position.apply_fill(false, Decimal::ONE, Decimal::ONE, Decimal::ONE);
        store.set_position(&a, &sub, &position).unwrap();
        assert!(store.positions_by_market(&b).unwrap().is_empty());
    }
}
