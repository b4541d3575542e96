//! Outcome digests for cross-node consistency.
//!
//! Every node matching the same block must reach the same outcome. The root
//! hashes each side's merged fills and cancellations in priority order so
//! two outcomes can be compared without shipping them.

use derivbook_types::DerivativeLimitOrder;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::matcher::{BookOutcome, DerivativeMatchingOutcome};

fn update_decimal(hasher: &mut Sha256, value: Decimal) {
    hasher.update(value.normalize().to_string().as_bytes());
    hasher.update([0u8]);
}

fn update_cancels(hasher: &mut Sha256, cancels: &[DerivativeLimitOrder]) {
    hasher.update((cancels.len() as u64).to_le_bytes());
    for order in cancels {
        hasher.update(order.hash.as_bytes());
    }
}

fn update_book(hasher: &mut Sha256, book: &BookOutcome) {
    hasher.update([book.side.as_byte()]);
    let merged = book.merged_fills();
    hasher.update((merged.len() as u64).to_le_bytes());
    for fill in merged {
        hasher.update(fill.order.hash.as_bytes());
        hasher.update([u8::from(fill.is_transient)]);
        update_decimal(hasher, fill.fill_quantity);
    }
    update_cancels(hasher, &book.resting_cancels);
    update_cancels(hasher, &book.transient_cancels);
}

/// Root over the clearing result and both books.
///
/// Depends on the market, clearing price and quantity, and for each side the
/// merged fill walk (order hash, source, quantity) followed by the resting
/// and transient cancellations.
#[must_use]
pub fn compute_outcome_root(outcome: &DerivativeMatchingOutcome) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"derivbook:outcome_root:v1:");
    hasher.update(outcome.market_id.as_bytes());
    match outcome.clearing_price {
        Some(price) => update_decimal(&mut hasher, price),
        None => hasher.update(b"none\0"),
    }
    update_decimal(&mut hasher, outcome.clearing_quantity);
    update_book(&mut hasher, &outcome.buys);
    update_book(&mut hasher, &outcome.sells);

    let result = hasher.finalize();
    let mut root = [0u8; 32];
    root.copy_from_slice(&result);
    root
}

#[must_use]
pub fn verify_outcome_root(outcome: &DerivativeMatchingOutcome, expected_root: &[u8; 32]) -> bool {
    compute_outcome_root(outcome) == *expected_root
}

/// Hex form of the root, for logs.
#[must_use]
pub fn outcome_root_hex(outcome: &DerivativeMatchingOutcome) -> String {
    hex::encode(compute_outcome_root(outcome))
}
