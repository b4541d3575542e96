//! # derivbook-matchcore
//!
//! **Deterministic limit order matching for derivative markets.**
//!
//! Each block, the matcher crosses the block's transient orders with each
//! other and with the persisted resting book of one market:
//!
//! - **Lazy validation**: resting orders are read one at a time and checked
//!   against the owner's position only when they reach the top of the book
//! - **Inline cancellation**: orders that fail validation are cancelled and
//!   skipped without aborting the pass
//! - **Uniform clearing**: every match in a pass trades at one price
//! - **Read only**: the outcome is returned for settlement to persist

pub mod clearing;
pub mod determinism;
pub mod fills;
pub mod matcher;
pub mod merge;
pub mod orderbook;

pub use clearing::clearing_price_from_matching;
pub use determinism::{compute_outcome_root, outcome_root_hex, verify_outcome_root};
pub use fills::OrderbookFills;
pub use matcher::{BookOutcome, DerivativeMatchingOutcome, match_limit_orders};
pub use merge::{MergedOrderbookFills, OrderbookFill};
pub use orderbook::{DerivativeLimitOrderbook, FillSource};
