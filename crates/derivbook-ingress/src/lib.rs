//! # derivbook-ingress
//!
//! **Order acceptance for the matching core.**
//!
//! Ingress sits between the order handlers and matching:
//! 1. **OrderValidator**: shape, reduce-only, bankruptcy, margin and
//!    open-notional-cap checks against block-start state
//! 2. **TransientOrderBuffer**: collects accepted orders for the block
//! 3. **Cancellation**: removes resting orders and their level quantity
//!
//! ## Order Flow
//!
//! ```text
//! handler → OrderValidator.validate() → TransientOrderBuffer.push()
//!     → seal() → take_sorted(market, side) → match_limit_orders
//! ```

pub mod cancellation;
pub mod notional_cap;
pub mod order_validation;
pub mod transient_orders;

pub use cancellation::cancel_resting_order;
pub use notional_cap::{check_open_notional_cap, does_breach_open_notional_cap, open_notional_delta};
pub use order_validation::OrderValidator;
pub use transient_orders::TransientOrderBuffer;
