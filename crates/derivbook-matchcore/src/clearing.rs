//! Clearing price of a matching pass.
//!
//! Every matched pair trades at one uniform price. The price is derived from
//! the last matched bid and ask, anchored to the resting book's mid price
//! when there is one and to the mark price otherwise.

use rust_decimal::Decimal;

/// Midpoint of the last matched prices. Used when neither a resting book
/// nor a mark price exists.
#[must_use]
pub fn full_fallback_clearing_price(last_buy: Decimal, last_sell: Decimal) -> Decimal {
    (last_buy + last_sell) / Decimal::TWO
}

/// Closest price to the mark inside `[last_sell, last_buy]`.
#[must_use]
pub fn oracle_fallback_clearing_price(
    last_buy: Decimal,
    last_sell: Decimal,
    mark_price: Decimal,
) -> Decimal {
    if last_buy <= mark_price {
        return last_buy;
    }
    if last_sell >= mark_price {
        return last_sell;
    }
    mark_price
}

/// Closest price to the mid inside `[last_sell, last_buy]`, falling back to
/// the mark when the mid lies inside the matched range.
#[must_use]
pub fn regular_clearing_price(
    last_buy: Decimal,
    last_sell: Decimal,
    mark_price: Option<Decimal>,
    mid_price: Decimal,
) -> Decimal {
    if last_buy <= mid_price {
        return last_buy;
    }
    if last_sell >= mid_price {
        return last_sell;
    }
    match mark_price {
        Some(mark) => oracle_fallback_clearing_price(last_buy, last_sell, mark),
        None => mid_price,
    }
}

/// Pick the clearing rule from what reference prices are available.
#[must_use]
pub fn clearing_price_from_matching(
    last_buy: Decimal,
    last_sell: Decimal,
    mark_price: Option<Decimal>,
    mid_price: Option<Decimal>,
) -> Decimal {
    match (mid_price, mark_price) {
        (None, None) => full_fallback_clearing_price(last_buy, last_sell),
        (None, Some(mark)) => oracle_fallback_clearing_price(last_buy, last_sell, mark),
        (Some(mid), mark) => regular_clearing_price(last_buy, last_sell, mark, mid),
    }
}
