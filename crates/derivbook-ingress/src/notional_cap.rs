//! Open-notional cap check for new orders.
//!
//! A market may cap the total notional of open positions. An order is
//! measured by how much it would change that total at the mark price:
//! reducing orders shrink it and always pass, opening orders grow it.

use derivbook_types::{DerivbookError, OpenNotionalCap, OrderSide, Result};
use rust_decimal::Decimal;

/// Signed notional the order would add to the market's open notional.
///
/// `position_quantity` is signed: positive long, negative short. An order
/// that closes the position and flips it only counts the growth in absolute
/// size.
#[must_use]
pub fn open_notional_delta(
    order_side: OrderSide,
    order_quantity: Decimal,
    mark_price: Decimal,
    position_quantity: Decimal,
) -> Decimal {
    let is_closing =
        !position_quantity.is_zero() && order_side.is_buy() == position_quantity.is_sign_negative();

    let quantity_delta = if is_closing {
        if order_quantity > position_quantity.abs() {
            let signed_order = if order_side.is_buy() {
                order_quantity
            } else {
                -order_quantity
            };
            (position_quantity + signed_order).abs() - position_quantity.abs()
        } else {
            -order_quantity
        }
    } else {
        order_quantity
    };

    quantity_delta * mark_price
}

/// Whether accepting the order would push open notional above `cap`.
#[must_use]
pub fn does_breach_open_notional_cap(
    order_side: OrderSide,
    order_quantity: Decimal,
    mark_price: Decimal,
    current_total_open_notional: Decimal,
    position_quantity: Decimal,
    cap: &OpenNotionalCap,
) -> bool {
    check_open_notional_cap(
        order_side,
        order_quantity,
        mark_price,
        current_total_open_notional,
        position_quantity,
        cap,
    )
    .is_err()
}

/// Cap check as a policy error. Only orders that shrink open notional pass
/// unconditionally; a flip that leaves size unchanged is still checked.
///
/// # Errors
/// `OpenNotionalCapBreached` with the figures that caused it.
pub fn check_open_notional_cap(
    order_side: OrderSide,
    order_quantity: Decimal,
    mark_price: Decimal,
    current_total_open_notional: Decimal,
    position_quantity: Decimal,
    cap: &OpenNotionalCap,
) -> Result<()> {
    let OpenNotionalCap::Capped { value } = cap else {
        return Ok(());
    };
    let delta = open_notional_delta(order_side, order_quantity, mark_price, position_quantity);
    if delta.is_sign_negative() && !delta.is_zero() {
        return Ok(());
    }
    if current_total_open_notional + delta > *value {
        return Err(DerivbookError::OpenNotionalCapBreached {
            current: current_total_open_notional,
            delta,
            cap: *value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn cap(value: i64) -> OpenNotionalCap {
        OpenNotionalCap::Capped { value: d(value) }
    }

    #[test]
    fn opening_buy_over_cap_is_rejected() {
        assert_eq!(open_notional_delta(OrderSide::Buy, d(15), d(10), Decimal::ZERO), d(150));
        assert!(does_breach_open_notional_cap(
            OrderSide::Buy,
            d(15),
            d(10),
            d(900),
            Decimal::ZERO,
            &cap(1000)
        ));
        assert!(!does_breach_open_notional_cap(
            OrderSide::Buy,
            d(10),
            d(10),
            d(900),
            Decimal::ZERO,
            &cap(1000)
        ));
    }

    #[test]
    fn reducing_sell_always_passes() {
        assert!(!does_breach_open_notional_cap(
            OrderSide::Sell,
            d(3),
            d(10),
            d(5000),
            d(5),
            &cap(1000)
        ));
        assert_eq!(open_notional_delta(OrderSide::Sell, d(3), d(10), d(5)), d(-30));
    }

    #[test]
    fn flip_counts_only_growth_in_size() {
        // Long 5, sell 12: ends short 7, size grows by 2.
        assert_eq!(open_notional_delta(OrderSide::Sell, d(12), d(10), d(5)), d(20));
        // Long 5, sell 8: ends short 3, size shrinks.
        assert_eq!(open_notional_delta(OrderSide::Sell, d(8), d(10), d(5)), d(-20));
        // Short 4, buy 10: ends long 6.
        assert_eq!(open_notional_delta(OrderSide::Buy, d(10), d(10), d(-4)), d(20));
        assert!(does_breach_open_notional_cap(
            OrderSide::Sell,
            d(12),
            d(10),
            d(990),
            d(5),
            &cap(1000)
        ));
    }

    #[test]
    fn exact_flip_over_cap_is_rejected() {
        // Long 5, sell 10: ends short 5, size unchanged.
        assert_eq!(open_notional_delta(OrderSide::Sell, d(10), d(10), d(5)), Decimal::ZERO);
        assert!(does_breach_open_notional_cap(
            OrderSide::Sell,
            d(10),
            d(10),
            d(1200),
            d(5),
            &cap(1000)
        ));
        assert!(!does_breach_open_notional_cap(
            OrderSide::Sell,
            d(10),
            d(10),
            d(1000),
            d(5),
            &cap(1000)
        ));
    }

    #[test]
    fn same_direction_adds_full_quantity() {
        assert_eq!(open_notional_delta(OrderSide::Buy, d(2), d(10), d(5)), d(20));
        assert_eq!(open_notional_delta(OrderSide::Sell, d(2), d(10), d(-5)), d(20));
    }

    #[test]
    fn uncapped_never_breaches() {
        assert!(!does_breach_open_notional_cap(
            OrderSide::Buy,
            d(1_000_000),
            d(10),
            d(1_000_000),
            Decimal::ZERO,
            &OpenNotionalCap::Uncapped
        ));
    }

    #[test]
    fn check_reports_figures() {
        let err = check_open_notional_cap(OrderSide::Buy, d(15), d(10), d(900), Decimal::ZERO, &cap(1000))
            .unwrap_err();
        match err {
            DerivbookError::OpenNotionalCapBreached { current, delta, cap } => {
                assert_eq!((current, delta, cap), (d(900), d(150), d(1000)));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(check_open_notional_cap(OrderSide::Sell, d(1), d(10), d(900), d(1), &cap(1000)).is_ok());
    }
}
