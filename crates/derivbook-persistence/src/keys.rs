//! Store key layouts.
//!
//! Prices are written as fixed-width zero-padded decimal strings so that
//! byte order equals numeric order:
//!
//! ```text
//! 00000000000000000000000000100.5000000000000000000000000000
//! |<------ 29 integer ------>|.|<------- 28 fraction ------->|
//! ```

use std::str::FromStr;

use derivbook_types::constants::{
    OPEN_INTEREST_PREFIX, ORDER_INDEX_PREFIX, ORDERBOOK_SEQUENCE_PREFIX, PADDED_PRICE_LEN,
    POSITION_PREFIX, PRICE_FRACTION_DIGITS, PRICE_INTEGER_DIGITS, PRICE_LEVEL_PREFIX,
    RESTING_ORDER_PREFIX, TRANSIENT_PRICE_LEVEL_PREFIX,
};
use derivbook_types::{DerivbookError, MarketId, OrderHash, OrderSide, Result, SubaccountId};
use rust_decimal::Decimal;

const MARKET_LEN: usize = 32;

/// Encode a non-negative price as a fixed-width sortable string.
pub fn pad_price(price: Decimal) -> Result<String> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(DerivbookError::MalformedKey {
            reason: format!("negative price {price}"),
        });
    }
    let text = price.normalize().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if int_part.len() > PRICE_INTEGER_DIGITS || frac_part.len() > PRICE_FRACTION_DIGITS {
        return Err(DerivbookError::MalformedKey {
            reason: format!("price {price} does not fit the key width"),
        });
    }
    Ok(format!(
        "{int_part:0>iw$}.{frac_part:0<fw$}",
        iw = PRICE_INTEGER_DIGITS,
        fw = PRICE_FRACTION_DIGITS
    ))
}

/// Inverse of [`pad_price`].
pub fn parse_padded_price(padded: &str) -> Result<Decimal> {
    let malformed = || DerivbookError::MalformedKey {
        reason: format!("bad padded price {padded:?}"),
    };
    let (int_part, frac_part) = padded.split_once('.').ok_or_else(malformed)?;
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = frac_part.trim_end_matches('0');
    let text = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    };
    Decimal::from_str(&text).map_err(|_| malformed())
}

fn market_side_prefix(prefix: u8, market_id: &MarketId, side: OrderSide) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + MARKET_LEN + PADDED_PRICE_LEN + 32);
    key.push(prefix);
    key.extend_from_slice(market_id.as_bytes());
    key.push(side.as_byte());
    key
}

fn market_key(prefix: u8, market_id: &MarketId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + MARKET_LEN + 32);
    key.push(prefix);
    key.extend_from_slice(market_id.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// Resting orders
// ---------------------------------------------------------------------------

#[must_use]
pub fn resting_orders_prefix(market_id: &MarketId, side: OrderSide) -> Vec<u8> {
    market_side_prefix(RESTING_ORDER_PREFIX, market_id, side)
}

#[must_use]
pub fn resting_orders_all_prefix() -> Vec<u8> {
    vec![RESTING_ORDER_PREFIX]
}

pub fn resting_order_key(
    market_id: &MarketId,
    side: OrderSide,
    price: Decimal,
    hash: &OrderHash,
) -> Result<Vec<u8>> {
    let mut key = resting_orders_prefix(market_id, side);
    key.extend_from_slice(pad_price(price)?.as_bytes());
    key.extend_from_slice(hash.as_bytes());
    Ok(key)
}

#[must_use]
pub fn order_index_key(market_id: &MarketId, hash: &OrderHash) -> Vec<u8> {
    let mut key = market_key(ORDER_INDEX_PREFIX, market_id);
    key.extend_from_slice(hash.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// Price levels
// ---------------------------------------------------------------------------

#[must_use]
pub fn price_levels_prefix(market_id: &MarketId, side: OrderSide) -> Vec<u8> {
    market_side_prefix(PRICE_LEVEL_PREFIX, market_id, side)
}

#[must_use]
pub fn price_levels_all_prefix() -> Vec<u8> {
    vec![PRICE_LEVEL_PREFIX]
}

pub fn price_level_key(market_id: &MarketId, side: OrderSide, price: Decimal) -> Result<Vec<u8>> {
    let mut key = price_levels_prefix(market_id, side);
    key.extend_from_slice(pad_price(price)?.as_bytes());
    Ok(key)
}

pub fn transient_price_level_key(
    market_id: &MarketId,
    side: OrderSide,
    price: Decimal,
) -> Result<Vec<u8>> {
    let mut key = market_side_prefix(TRANSIENT_PRICE_LEVEL_PREFIX, market_id, side);
    key.extend_from_slice(pad_price(price)?.as_bytes());
    Ok(key)
}

#[must_use]
pub fn transient_price_levels_all_prefix() -> Vec<u8> {
    vec![TRANSIENT_PRICE_LEVEL_PREFIX]
}

/// Split a (durable or transient) price-level key into its parts.
pub fn parse_price_level_key(key: &[u8]) -> Result<(MarketId, OrderSide, Decimal)> {
    let malformed = |reason: &str| DerivbookError::MalformedKey {
        reason: format!("price level key: {reason}"),
    };
    if key.len() != 1 + MARKET_LEN + 1 + PADDED_PRICE_LEN {
        return Err(malformed("wrong length"));
    }
    let market: [u8; 32] = key[1..=MARKET_LEN]
        .try_into()
        .map_err(|_| malformed("market"))?;
    let side = OrderSide::from_byte(key[1 + MARKET_LEN]).ok_or_else(|| malformed("side"))?;
    let padded =
        std::str::from_utf8(&key[2 + MARKET_LEN..]).map_err(|_| malformed("price encoding"))?;
    Ok((MarketId(market), side, parse_padded_price(padded)?))
}

/// Price embedded in a resting-order key.
pub fn parse_resting_order_key_price(key: &[u8]) -> Result<Decimal> {
    let start = 2 + MARKET_LEN;
    let end = start + PADDED_PRICE_LEN;
    if key.len() != end + 32 {
        return Err(DerivbookError::MalformedKey {
            reason: "resting order key: wrong length".into(),
        });
    }
    let padded = std::str::from_utf8(&key[start..end]).map_err(|_| {
        DerivbookError::MalformedKey {
            reason: "resting order key: price encoding".into(),
        }
    })?;
    parse_padded_price(padded)
}

// ---------------------------------------------------------------------------
// Per-market scalars and positions
// ---------------------------------------------------------------------------

#[must_use]
pub fn orderbook_sequence_key(market_id: &MarketId) -> Vec<u8> {
    market_key(ORDERBOOK_SEQUENCE_PREFIX, market_id)
}

#[must_use]
pub fn open_interest_key(market_id: &MarketId) -> Vec<u8> {
    market_key(OPEN_INTEREST_PREFIX, market_id)
}

#[must_use]
pub fn positions_prefix(market_id: &MarketId) -> Vec<u8> {
    market_key(POSITION_PREFIX, market_id)
}

#[must_use]
pub fn position_key(market_id: &MarketId, subaccount_id: &SubaccountId) -> Vec<u8> {
    let mut key = positions_prefix(market_id);
    key.extend_from_slice(subaccount_id.as_bytes());
    key
}
