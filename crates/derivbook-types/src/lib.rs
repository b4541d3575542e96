//! # derivbook-types
//!
//! Shared types, errors, and configuration for the **derivbook** matching core.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`MarketId`], [`SubaccountId`], [`OrderHash`], [`BlockHeight`]
//! - **Order model**: [`DerivativeLimitOrder`], [`OrderSide`]
//! - **Position model**: [`Position`], [`PositionState`], [`PositionStates`], [`PerpetualMarketFunding`]
//! - **Levels and events**: [`Level`], [`OrderbookUpdate`]
//! - **Configuration**: [`DerivativeMarket`], [`MarketType`], [`OpenNotionalCap`], [`ExchangeConfig`]
//! - **Errors**: [`DerivbookError`] with `DVB_ERR_` prefix codes
//! - **Constants**: key widths, store prefixes, and limits

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod level;
pub mod order;
pub mod position;

// Re-export all primary types at crate root for ergonomic imports:
//   use derivbook_types::{DerivativeLimitOrder, OrderSide, Position, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use level::*;
pub use order::*;
pub use position::*;

// Constants are accessed via `derivbook_types::constants::FOO`
// (not re-exported to avoid name collisions).
