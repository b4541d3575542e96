//! Derivative limit orders.
//!
//! An order's identity fields never change once it is created. Only
//! `fillable` moves, and only when fills or cancellations are persisted by
//! settlement. The matcher never mutates an order; it tracks cumulative fills
//! beside it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{DerivbookError, MarketId, OrderHash, Result, SubaccountId};

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub fn is_buy(self) -> bool {
        matches!(self, Self::Buy)
    }

    #[must_use]
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy { Self::Buy } else { Self::Sell }
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// `a` is strictly better than `b` from this side's perspective
    /// (higher for bids, lower for asks).
    #[must_use]
    pub fn is_strictly_better(self, a: Decimal, b: Decimal) -> bool {
        match self {
            Self::Buy => a > b,
            Self::Sell => a < b,
        }
    }

    /// `a` is at least as good as `b` from this side's perspective.
    #[must_use]
    pub fn is_better_or_equal(self, a: Decimal, b: Decimal) -> bool {
        match self {
            Self::Buy => a >= b,
            Self::Sell => a <= b,
        }
    }

    /// Single-byte tag used in store keys and hashes.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Buy => 0x01,
            Self::Sell => 0x02,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Buy),
            0x02 => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A limit order on a derivative market.
///
/// `margin == 0` marks a reduce-only order: it can only shrink an existing
/// opposite position. Any positive margin makes it a vanilla order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeLimitOrder {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: OrderSide,
    pub price: Decimal,
    /// Original quantity at placement.
    pub quantity: Decimal,
    /// Margin locked by the order for its full original quantity.
    pub margin: Decimal,
    /// Remaining quantity eligible to match.
    pub fillable: Decimal,
    /// Per-subaccount placement nonce; makes the hash unique.
    pub nonce: u64,
    pub hash: OrderHash,
}

impl DerivativeLimitOrder {
    /// Build a fresh order with `fillable == quantity` and its hash computed.
    #[must_use]
    pub fn new(
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        margin: Decimal,
        nonce: u64,
    ) -> Self {
        let hash = Self::compute_hash(
            &market_id,
            &subaccount_id,
            side,
            price,
            quantity,
            margin,
            nonce,
        );
        Self {
            market_id,
            subaccount_id,
            side,
            price,
            quantity,
            margin,
            fillable: quantity,
            nonce,
            hash,
        }
    }

    /// SHA-256 over the immutable fields. Decimals are hashed in normalized
    /// string form so `1.50` and `1.5` hash identically.
    #[must_use]
    pub fn compute_hash(
        market_id: &MarketId,
        subaccount_id: &SubaccountId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        margin: Decimal,
        nonce: u64,
    ) -> OrderHash {
        let mut hasher = Sha256::new();
        hasher.update(b"derivbook:order:");
        hasher.update(market_id.as_bytes());
        hasher.update(subaccount_id.as_bytes());
        hasher.update([side.as_byte()]);
        hasher.update(price.normalize().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(quantity.normalize().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(margin.normalize().to_string().as_bytes());
        hasher.update(nonce.to_be_bytes());
        OrderHash::from_digest(hasher)
    }

    #[must_use]
    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    #[must_use]
    pub fn is_reduce_only(&self) -> bool {
        self.margin.is_zero()
    }

    #[must_use]
    pub fn is_vanilla(&self) -> bool {
        !self.is_reduce_only()
    }

    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Quantity already filled and persisted.
    #[must_use]
    pub fn filled_quantity(&self) -> Decimal {
        self.quantity - self.fillable
    }

    /// Margin attributable to `quantity` units of this order.
    #[must_use]
    pub fn margin_for(&self, quantity: Decimal) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.margin * quantity / self.quantity
        }
    }

    /// Mark price beyond which the order no longer carries enough margin.
    ///
    /// Buys: `(margin - price*qty) / ((imr - 1) * qty)`.
    /// Sells: `(margin + price*qty) / ((imr + 1) * qty)`.
    pub fn compute_initial_margin_requirement_mark_price_threshold(
        &self,
        initial_margin_ratio: Decimal,
    ) -> Result<Decimal> {
        let notional = self.price * self.quantity;
        let (numerator, denominator) = if self.is_buy() {
            (
                self.margin - notional,
                (initial_margin_ratio - Decimal::ONE) * self.quantity,
            )
        } else {
            (
                self.margin + notional,
                (initial_margin_ratio + Decimal::ONE) * self.quantity,
            )
        };
        numerator
            .checked_div(denominator)
            .ok_or_else(|| DerivbookError::InvalidOrder {
                reason: format!(
                    "cannot compute mark price threshold (quantity {}, imr {initial_margin_ratio})",
                    self.quantity
                ),
            })
    }

    /// Reject when the mark price is below the threshold (buy) or above it (sell).
    pub fn check_initial_margin_requirement_mark_price_threshold(
        &self,
        initial_margin_ratio: Decimal,
        mark_price: Decimal,
    ) -> Result<()> {
        let threshold =
            self.compute_initial_margin_requirement_mark_price_threshold(initial_margin_ratio)?;
        let breached = if self.is_buy() {
            mark_price < threshold
        } else {
            mark_price > threshold
        };
        if breached {
            return Err(DerivbookError::InsufficientOrderMargin {
                mark_price,
                threshold,
            });
        }
        Ok(())
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl DerivativeLimitOrder {
    fn next_dummy_nonce() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NONCE: AtomicU64 = AtomicU64::new(1);
        NONCE.fetch_add(1, Ordering::Relaxed)
    }

    /// Fully collateralised (1x) order from a throwaway subaccount on the
    /// default test market.
    pub fn dummy_limit(side: OrderSide, price: Decimal, qty: Decimal) -> Self {
        let nonce = Self::next_dummy_nonce();
        let trader = format!("dummy-{nonce}");
        Self::new(
            MarketId::from_ticker(crate::constants::TEST_MARKET_TICKER),
            SubaccountId::from_trader(&trader, 0),
            side,
            price,
            qty,
            price * qty,
            nonce,
        )
    }

    /// Order for a chosen subaccount with explicit margin.
    pub fn dummy_limit_for(
        subaccount_id: SubaccountId,
        side: OrderSide,
        price: Decimal,
        qty: Decimal,
        margin: Decimal,
    ) -> Self {
        Self::new(
            MarketId::from_ticker(crate::constants::TEST_MARKET_TICKER),
            subaccount_id,
            side,
            price,
            qty,
            margin,
            Self::next_dummy_nonce(),
        )
    }
}
