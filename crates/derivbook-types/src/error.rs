//! Error types for the derivbook matching core.
//!
//! All errors use the `DVB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Position / margin policy rejections
//! - 3xx: Storage and codec errors
//! - 4xx: Invariant violations
//! - 5xx: Matching errors
//! - 9xx: General / internal errors
//!
//! Policy rejections (2xx) never abort a block: the matcher turns them into
//! cancellations. Storage errors (3xx) are fatal for the block being executed.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{MarketId, OrderHash};

/// Central error enum for all derivbook operations.
#[derive(Debug, Error)]
pub enum DerivbookError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The requested order was not found in the resting index.
    #[error("DVB_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderHash),

    /// The order failed validation (missing fields, bad values, etc.).
    #[error("DVB_ERR_101: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// An order with this hash already exists.
    #[error("DVB_ERR_102: Order already exists: {0}")]
    DuplicateOrder(OrderHash),

    /// The order belongs to another market than the one being processed.
    #[error("DVB_ERR_103: Order market {actual} does not match {expected}")]
    MarketMismatch { expected: MarketId, actual: MarketId },

    /// The transient buffer for this block has been sealed.
    #[error("DVB_ERR_104: Transient order buffer already sealed")]
    BufferAlreadySealed,

    /// The transient buffer for this block is full.
    #[error("DVB_ERR_105: Transient order buffer full")]
    BufferFull,

    // =================================================================
    // Position / Margin Policy Rejections (2xx)
    // =================================================================
    /// Closing at this price would surpass the position's bankruptcy price.
    #[error("DVB_ERR_200: Price {price} surpasses bankruptcy price {bankruptcy_price}")]
    PriceSurpassesBankruptcyPrice {
        price: Decimal,
        bankruptcy_price: Decimal,
    },

    /// The order does not carry enough margin at the current mark price.
    #[error(
        "DVB_ERR_201: Insufficient order margin: mark price {mark_price} breaches threshold {threshold}"
    )]
    InsufficientOrderMargin {
        mark_price: Decimal,
        threshold: Decimal,
    },

    /// A reduce-only order points the same way as the position it reduces.
    #[error("DVB_ERR_202: Reduce order has the same direction as the position")]
    InvalidReduceDirection,

    /// Reduce-only order without a position to reduce.
    #[error("DVB_ERR_203: No position to reduce in market {0}")]
    PositionNotFound(MarketId),

    /// Accepting the order would lift total open notional above the cap.
    #[error("DVB_ERR_204: Open notional cap {cap} breached: {current} + {delta}")]
    OpenNotionalCapBreached {
        current: Decimal,
        delta: Decimal,
        cap: Decimal,
    },

    // =================================================================
    // Storage Errors (3xx)
    // =================================================================
    /// Persisted bytes could not be decoded. Indicates prior corruption.
    #[error("DVB_ERR_300: Corrupted state: {reason}")]
    CorruptedState { reason: String },

    /// A price level would drop below zero.
    #[error("DVB_ERR_301: Negative price level quantity {quantity} at price {price}")]
    NegativePriceLevel { price: Decimal, quantity: Decimal },

    /// A store key did not have the expected layout.
    #[error("DVB_ERR_302: Malformed store key: {reason}")]
    MalformedKey { reason: String },

    // =================================================================
    // Invariant Violations (4xx)
    // =================================================================
    /// Long and short open interest disagree.
    #[error("DVB_ERR_400: Open interest mismatch in market {market}: long {long}, short {short}")]
    OpenInterestMismatch {
        market: MarketId,
        long: Decimal,
        short: Decimal,
    },

    /// A persisted position has a negative quantity.
    #[error("DVB_ERR_401: Negative position quantity in market {0}")]
    NegativePositionQuantity(MarketId),

    // =================================================================
    // Matching Errors (5xx)
    // =================================================================
    /// The matching pass could not complete.
    #[error("DVB_ERR_500: Matching failed: {reason}")]
    MatchingFailed { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("DVB_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("DVB_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("DVB_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl DerivbookError {
    /// Whether this error is a policy rejection that cancels an order rather
    /// than aborting the block.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::PriceSurpassesBankruptcyPrice { .. }
                | Self::InsufficientOrderMargin { .. }
                | Self::InvalidReduceDirection
                | Self::PositionNotFound(_)
                | Self::OpenNotionalCapBreached { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DerivbookError>;

impl From<serde_json::Error> for DerivbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = DerivbookError::OrderNotFound(OrderHash([7u8; 32]));
        let msg = format!("{err}");
        assert!(msg.starts_with("DVB_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn bankruptcy_display_contains_prices() {
        let err = DerivbookError::PriceSurpassesBankruptcyPrice {
            price: Decimal::new(90, 0),
            bankruptcy_price: Decimal::new(95, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("DVB_ERR_200"));
        assert!(msg.contains("90"));
        assert!(msg.contains("95"));
    }

    #[test]
    fn policy_rejections_are_classified() {
        assert!(DerivbookError::InvalidReduceDirection.is_policy_rejection());
        assert!(
            DerivbookError::InsufficientOrderMargin {
                mark_price: Decimal::ONE,
                threshold: Decimal::TWO,
            }
            .is_policy_rejection()
        );
        assert!(
            !DerivbookError::CorruptedState {
                reason: "bad bytes".into()
            }
            .is_policy_rejection()
        );
        assert!(!DerivbookError::Internal("x".into()).is_policy_rejection());
    }

    #[test]
    fn all_errors_have_dvb_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(DerivbookError::BufferFull),
            Box::new(DerivbookError::InvalidReduceDirection),
            Box::new(DerivbookError::Internal("test".into())),
            Box::new(DerivbookError::OpenInterestMismatch {
                market: MarketId([1u8; 32]),
                long: Decimal::ONE,
                short: Decimal::TWO,
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("DVB_ERR_"),
                "Error missing DVB_ERR_ prefix: {msg}"
            );
        }
    }

    #[test]
    fn serde_json_error_converts() {
        let err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let converted: DerivbookError = err.into();
        assert!(matches!(converted, DerivbookError::Serialization(_)));
    }
}
