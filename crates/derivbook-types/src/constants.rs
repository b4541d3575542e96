//! System-wide constants for the derivbook matching core.

/// Digits reserved for the integer part of a price in store keys.
pub const PRICE_INTEGER_DIGITS: usize = 29;

/// Digits reserved for the fractional part of a price in store keys.
pub const PRICE_FRACTION_DIGITS: usize = 28;

/// Total width of a padded price: integer digits, a dot, fraction digits.
pub const PADDED_PRICE_LEN: usize = PRICE_INTEGER_DIGITS + 1 + PRICE_FRACTION_DIGITS;

// ---------------------------------------------------------------------------
// Store key prefixes
// ---------------------------------------------------------------------------

/// Resting limit orders: `prefix | market | side | padded price | hash`.
pub const RESTING_ORDER_PREFIX: u8 = 0x21;

/// Durable price-level totals: `prefix | market | side | padded price`.
pub const PRICE_LEVEL_PREFIX: u8 = 0x22;

/// Per-market orderbook sequence: `prefix | market`.
pub const ORDERBOOK_SEQUENCE_PREFIX: u8 = 0x23;

/// Per-market open interest: `prefix | market`.
pub const OPEN_INTEREST_PREFIX: u8 = 0x24;

/// Positions: `prefix | market | subaccount`.
pub const POSITION_PREFIX: u8 = 0x25;

/// Order hash to resting-order key: `prefix | market | hash`.
pub const ORDER_INDEX_PREFIX: u8 = 0x26;

/// Transient overlay of touched price levels (per block).
pub const TRANSIENT_PRICE_LEVEL_PREFIX: u8 = 0x31;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum transient orders accepted per block across all markets.
pub const DEFAULT_MAX_TRANSIENT_ORDERS_PER_BLOCK: usize = 100_000;

/// Ticker of the market used by test helpers.
pub const TEST_MARKET_TICKER: &str = "BTC/USDT PERP";
