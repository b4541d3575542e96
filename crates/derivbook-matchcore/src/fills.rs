//! Fill sets: orders paired with the quantity filled during one pass.
//!
//! The order vector is in priority order. `fill_quantities[i]` starts at zero,
//! only grows, and never exceeds `orders[i].fillable`.

use std::collections::BTreeSet;

use derivbook_types::{DerivativeLimitOrder, OrderHash};
use rust_decimal::Decimal;

/// Orders of one book and source (resting or transient) with their
/// cumulative fills for the current matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderbookFills {
    pub orders: Vec<DerivativeLimitOrder>,
    pub fill_quantities: Vec<Decimal>,
}

impl OrderbookFills {
    /// Wrap priority-sorted orders with zero fills.
    #[must_use]
    pub fn new(orders: Vec<DerivativeLimitOrder>) -> Self {
        let fill_quantities = vec![Decimal::ZERO; orders.len()];
        Self {
            orders,
            fill_quantities,
        }
    }

    /// Append an order with zero fill; returns its index.
    pub fn push(&mut self, order: DerivativeLimitOrder) -> usize {
        self.orders.push(order);
        self.fill_quantities.push(Decimal::ZERO);
        self.orders.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Fillable quantity of order `index` not yet filled in this pass.
    #[must_use]
    pub fn remaining(&self, index: usize) -> Decimal {
        self.orders[index].fillable - self.fill_quantities[index]
    }

    /// Add `quantity` to order `index` and return its cumulative fill.
    ///
    /// # Panics
    /// If the fill would exceed the order's `fillable`.
    pub fn add_fill(&mut self, index: usize, quantity: Decimal) -> Decimal {
        let cumulative = self.fill_quantities[index] + quantity;
        assert!(
            cumulative <= self.orders[index].fillable,
            "fill of {quantity} exceeds remaining {} of order {}",
            self.remaining(index),
            self.orders[index].hash
        );
        self.fill_quantities[index] = cumulative;
        cumulative
    }

    #[must_use]
    pub fn total_filled(&self) -> Decimal {
        self.fill_quantities.iter().copied().sum()
    }

    /// Sum of `price * fill` over all orders.
    #[must_use]
    pub fn filled_notional(&self) -> Decimal {
        self.iter()
            .map(|(order, filled)| order.price * filled)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DerivativeLimitOrder, Decimal)> {
        self.orders.iter().zip(self.fill_quantities.iter().copied())
    }

    /// Copy without the orders whose hash is in `excluded`.
    #[must_use]
    pub fn without(&self, excluded: &BTreeSet<OrderHash>) -> Self {
        if excluded.is_empty() {
            return self.clone();
        }
        let mut filtered = Self::default();
        for (order, filled) in self.iter() {
            if !excluded.contains(&order.hash) {
                filtered.orders.push(order.clone());
                filtered.fill_quantities.push(filled);
            }
        }
        filtered
    }
}
