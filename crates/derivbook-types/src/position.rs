//! Positions, funding, and the per-pass position state table.
//!
//! The matcher only needs positions as validation oracles: whether an order
//! closes an existing position, and whether closing at a given price stays
//! above the bankruptcy price. Settlement additionally nets fills into
//! positions via [`Position::apply_fill`].

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DerivbookError, MarketType, Result, SubaccountId};

/// Cumulative funding of a perpetual market. Expiry and binary-option
/// markets have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerpetualMarketFunding {
    pub cumulative_funding: Decimal,
}

/// A subaccount's position in one market. Quantity is unsigned; direction
/// lives in `is_long`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub is_long: bool,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
    pub cumulative_funding_entry: Decimal,
}

/// Cash effect of netting a fill into a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionFillResult {
    /// Quantity of the previous position that was closed.
    pub closed_quantity: Decimal,
    /// PnL realised on the closed quantity.
    pub realized_pnl: Decimal,
    /// Position margin released by the close.
    pub released_margin: Decimal,
}

impl Position {
    #[must_use]
    pub fn new(is_long: bool, cumulative_funding_entry: Decimal) -> Self {
        Self {
            is_long,
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            margin: Decimal::ZERO,
            cumulative_funding_entry,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Positive for longs, negative for shorts.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        if self.is_long {
            self.quantity
        } else {
            -self.quantity
        }
    }

    /// An order closes this position when it points the other way and there
    /// is something to close.
    #[must_use]
    pub fn is_closed_by(&self, order_is_buy: bool) -> bool {
        self.is_long != order_is_buy && self.quantity > Decimal::ZERO
    }

    fn unrealized_funding(&self, funding: Option<&PerpetualMarketFunding>) -> Decimal {
        funding.map_or(Decimal::ZERO, |f| {
            self.quantity * (f.cumulative_funding - self.cumulative_funding_entry)
        })
    }

    /// Settle accrued funding into margin and move the entry to the current
    /// cumulative funding. Longs pay positive funding, shorts receive it.
    pub fn apply_funding(&mut self, funding: Option<&PerpetualMarketFunding>) {
        let Some(f) = funding else {
            return;
        };
        let payment = self.unrealized_funding(Some(f));
        if self.is_long {
            self.margin -= payment;
        } else {
            self.margin += payment;
        }
        self.cumulative_funding_entry = f.cumulative_funding;
    }

    /// Margin including funding not yet applied.
    #[must_use]
    pub fn effective_margin(&self, funding: Option<&PerpetualMarketFunding>) -> Decimal {
        let payment = self.unrealized_funding(funding);
        if self.is_long {
            self.margin - payment
        } else {
            self.margin + payment
        }
    }

    /// Price at which the position (plus `added_margin`) is worth zero.
    #[must_use]
    pub fn bankruptcy_price_with_added_margin(
        &self,
        funding: Option<&PerpetualMarketFunding>,
        added_margin: Decimal,
    ) -> Decimal {
        if self.quantity.is_zero() {
            return Decimal::ZERO;
        }
        let per_unit = (self.effective_margin(funding) + added_margin) / self.quantity;
        if self.is_long {
            self.entry_price - per_unit
        } else {
            self.entry_price + per_unit
        }
    }

    /// Validate an order that reduces this position.
    ///
    /// Longs: `price >= bankruptcy / (1 - fee)`.
    /// Shorts: `price <= bankruptcy / (1 + fee)`.
    /// Binary options are fully collateralised and always pass.
    pub fn check_valid_position_to_reduce(
        &self,
        market_type: MarketType,
        price: Decimal,
        is_buy_order: bool,
        fee_rate: Decimal,
        funding: Option<&PerpetualMarketFunding>,
        order_margin: Decimal,
    ) -> Result<()> {
        if is_buy_order == self.is_long {
            return Err(DerivbookError::InvalidReduceDirection);
        }
        if market_type == MarketType::BinaryOption {
            return Ok(());
        }

        let bankruptcy_price = self.bankruptcy_price_with_added_margin(funding, order_margin);
        let (fee_adjusted, breached) = if self.is_long {
            let adjusted = Self::fee_adjusted(bankruptcy_price, Decimal::ONE - fee_rate)?;
            (adjusted, price < adjusted)
        } else {
            let adjusted = Self::fee_adjusted(bankruptcy_price, Decimal::ONE + fee_rate)?;
            (adjusted, price > adjusted)
        };
        if breached {
            return Err(DerivbookError::PriceSurpassesBankruptcyPrice {
                price,
                bankruptcy_price: fee_adjusted,
            });
        }
        Ok(())
    }

    fn fee_adjusted(bankruptcy_price: Decimal, factor: Decimal) -> Result<Decimal> {
        bankruptcy_price
            .checked_div(factor)
            .ok_or_else(|| DerivbookError::InvalidOrder {
                reason: format!("fee factor {factor} is not usable"),
            })
    }

    /// Net a fill of `quantity` at `price` into the position. `margin` is the
    /// order margin attached to the filled quantity; only the part funding
    /// new exposure is added to the position.
    pub fn apply_fill(
        &mut self,
        is_buy: bool,
        quantity: Decimal,
        price: Decimal,
        margin: Decimal,
    ) -> PositionFillResult {
        let mut result = PositionFillResult::default();
        if quantity.is_zero() {
            return result;
        }

        if self.quantity.is_zero() {
            self.is_long = is_buy;
            self.quantity = quantity;
            self.entry_price = price;
            self.margin = margin;
            return result;
        }

        if self.is_long == is_buy {
            let total = self.quantity + quantity;
            self.entry_price = (self.entry_price * self.quantity + price * quantity) / total;
            self.quantity = total;
            self.margin += margin;
            return result;
        }

        let closed = quantity.min(self.quantity);
        let pnl_per_unit = if self.is_long {
            price - self.entry_price
        } else {
            self.entry_price - price
        };
        result.closed_quantity = closed;
        result.realized_pnl = pnl_per_unit * closed;
        result.released_margin = self.margin * closed / self.quantity;

        self.margin -= result.released_margin;
        self.quantity -= closed;

        let opened = quantity - closed;
        if opened.is_zero() {
            if self.quantity.is_zero() {
                self.entry_price = Decimal::ZERO;
                self.margin = Decimal::ZERO;
            }
        } else {
            self.is_long = is_buy;
            self.quantity = opened;
            self.entry_price = price;
            self.margin = margin * opened / quantity;
        }
        result
    }
}

/// Funding-adjusted position cached for one matching pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    pub position: Position,
}

/// Per-subaccount position cache for a single market's matching pass.
///
/// Owned by whoever drives the pass and lent to both books by `&mut`, so
/// funding is applied at most once per subaccount across bids and asks.
#[derive(Debug, Clone, Default)]
pub struct PositionStates {
    states: BTreeMap<SubaccountId, PositionState>,
}

impl PositionStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, subaccount_id: &SubaccountId) -> Option<&PositionState> {
        self.states.get(subaccount_id)
    }

    pub fn get_mut(&mut self, subaccount_id: &SubaccountId) -> Option<&mut PositionState> {
        self.states.get_mut(subaccount_id)
    }

    #[must_use]
    pub fn contains(&self, subaccount_id: &SubaccountId) -> bool {
        self.states.contains_key(subaccount_id)
    }

    pub fn insert(&mut self, subaccount_id: SubaccountId, state: PositionState) {
        self.states.insert(subaccount_id, state);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubaccountId, &PositionState)> {
        self.states.iter()
    }
}
