//! Merge cursor over a resting and a transient fill set of the same book.
//!
//! Both sets are already in priority order. The cursor walks them as one
//! sequence without copying: at equal prices the resting order comes first.

use derivbook_types::{DerivativeLimitOrder, OrderSide};
use rust_decimal::Decimal;

use crate::fills::OrderbookFills;

/// One entry of the merged walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderbookFill<'a> {
    pub order: &'a DerivativeLimitOrder,
    pub fill_quantity: Decimal,
    pub is_transient: bool,
}

#[derive(Debug, Clone)]
pub struct MergedOrderbookFills<'a> {
    side: OrderSide,
    resting: &'a OrderbookFills,
    transient: &'a OrderbookFills,
    resting_index: usize,
    transient_index: usize,
}

impl<'a> MergedOrderbookFills<'a> {
    #[must_use]
    pub fn new(side: OrderSide, resting: &'a OrderbookFills, transient: &'a OrderbookFills) -> Self {
        Self {
            side,
            resting,
            transient,
            resting_index: 0,
            transient_index: 0,
        }
    }

    #[must_use]
    pub fn done(&self) -> bool {
        self.resting_index == self.resting.len() && self.transient_index == self.transient.len()
    }

    fn resting_fill(&self) -> OrderbookFill<'a> {
        let resting = self.resting;
        OrderbookFill {
            order: &resting.orders[self.resting_index],
            fill_quantity: resting.fill_quantities[self.resting_index],
            is_transient: false,
        }
    }

    fn transient_fill(&self) -> OrderbookFill<'a> {
        let transient = self.transient;
        OrderbookFill {
            order: &transient.orders[self.transient_index],
            fill_quantity: transient.fill_quantities[self.transient_index],
            is_transient: true,
        }
    }

    /// Best next entry across both sets without advancing.
    #[must_use]
    pub fn peek(&self) -> Option<OrderbookFill<'a>> {
        let resting_left = self.resting_index < self.resting.len();
        let transient_left = self.transient_index < self.transient.len();
        match (resting_left, transient_left) {
            (false, false) => None,
            (true, false) => Some(self.resting_fill()),
            (false, true) => Some(self.transient_fill()),
            (true, true) => {
                let resting_price = self.resting.orders[self.resting_index].price;
                let transient_price = self.transient.orders[self.transient_index].price;
                if self.side.is_better_or_equal(resting_price, transient_price) {
                    Some(self.resting_fill())
                } else {
                    Some(self.transient_fill())
                }
            }
        }
    }
}

impl<'a> Iterator for MergedOrderbookFills<'a> {
    type Item = OrderbookFill<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let fill = self.peek()?;
        if fill.is_transient {
            self.transient_index += 1;
        } else {
            self.resting_index += 1;
        }
        Some(fill)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.resting.len() - self.resting_index)
            + (self.transient.len() - self.transient_index);
        (left, Some(left))
    }
}

impl ExactSizeIterator for MergedOrderbookFills<'_> {}
