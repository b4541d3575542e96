//! # derivbook-settlement
//!
//! **Finality Plane**: applying matching outcomes to persisted state.
//!
//! ## Architecture
//!
//! Settlement receives a [`DerivativeMatchingOutcome`] from matchcore and:
//! 1. Deletes resting orders cancelled during matching
//! 2. Shrinks or deletes filled resting orders and their price levels
//! 3. Places the unfilled remainder of transient orders on the book
//! 4. Nets every fill into its owner's position at the clearing price
//! 5. Moves open interest by the change in total long quantity
//!
//! The [`invariants`] module reconciles price levels with resting orders and
//! open interest with positions, for tests and diagnostics.
//!
//! [`DerivativeMatchingOutcome`]: derivbook_matchcore::DerivativeMatchingOutcome

pub mod invariants;
pub mod persist;

pub use invariants::{check_aggregate_volumes, check_market_invariants, check_open_interest};
pub use persist::{SettlementSummary, persist_matching_outcome};
