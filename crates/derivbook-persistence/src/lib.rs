//! # derivbook-persistence
//!
//! **State Plane**: the keeper's durable state and its per-block overlay.
//!
//! ## Layout
//!
//! - [`kv`]: byte-ordered in-memory key-value map with prefix scans
//! - [`keys`]: key layouts and the sortable padded-price encoding
//! - [`store`]: [`ExchangeStore`], durable store plus transient overlay
//! - [`orders`]: resting-order index and the lazy [`RestingOrderCursor`]
//! - [`price_levels`]: price-level aggregate index, depth queries, orderbook
//!   sequences, end-of-block update emission
//! - [`positions`]: persisted positions and the [`PositionKeeper`] seam
//! - [`open_interest`]: per-market open interest
//!
//! All methods are synchronous and deterministic. A block is executed by one
//! logical thread; nothing here is shared across threads.

pub mod keys;
pub mod kv;
pub mod open_interest;
pub mod orders;
pub mod positions;
pub mod price_levels;
pub mod store;

pub use kv::MemStore;
pub use orders::RestingOrderCursor;
pub use positions::PositionKeeper;
pub use price_levels::LevelsLimit;
pub use store::ExchangeStore;
