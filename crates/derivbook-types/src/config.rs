//! Configuration types for derivative markets and the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DerivbookError, MarketId, Result, constants};

/// Instrument family of a derivative market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Perpetual,
    Expiry,
    BinaryOption,
}

impl MarketType {
    /// Only perpetuals accrue funding.
    #[must_use]
    pub fn has_funding(self) -> bool {
        matches!(self, Self::Perpetual)
    }
}

/// Cap on total open notional of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpenNotionalCap {
    #[default]
    Uncapped,
    Capped {
        value: Decimal,
    },
}

impl OpenNotionalCap {
    #[must_use]
    pub fn is_capped(&self) -> bool {
        matches!(self, Self::Capped { .. })
    }
}

/// Per-market configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeMarket {
    pub market_id: MarketId,
    pub ticker: String,
    pub market_type: MarketType,
    /// Fee rate charged to resting orders.
    pub maker_fee_rate: Decimal,
    /// Fee rate charged to orders placed in the current block.
    pub taker_fee_rate: Decimal,
    /// Margin an opening order must post per unit of notional.
    pub initial_margin_ratio: Decimal,
    /// Margin a position must keep before liquidation. Never above
    /// `initial_margin_ratio`.
    pub maintenance_margin_ratio: Decimal,
    #[serde(default)]
    pub open_notional_cap: OpenNotionalCap,
}

impl DerivativeMarket {
    /// A market with the given ticker, type, and default fee/margin params.
    #[must_use]
    pub fn new(ticker: &str, market_type: MarketType) -> Self {
        Self {
            market_id: MarketId::from_ticker(ticker),
            ticker: ticker.to_string(),
            market_type,
            maker_fee_rate: Decimal::new(1, 3), // 0.1%
            taker_fee_rate: Decimal::new(2, 3), // 0.2%
            initial_margin_ratio: Decimal::new(5, 2), // 5%
            maintenance_margin_ratio: Decimal::new(2, 2), // 2%
            open_notional_cap: OpenNotionalCap::Uncapped,
        }
    }

    /// Default BTC/USDT perpetual.
    #[must_use]
    pub fn btc_usdt_perp() -> Self {
        Self::new("BTC/USDT PERP", MarketType::Perpetual)
    }

    /// Default ETH/USDT expiry future.
    #[must_use]
    pub fn eth_usdt_expiry() -> Self {
        Self::new("ETH/USDT 24DEC", MarketType::Expiry)
    }

    /// Binary option market; fees only, no margin leverage.
    #[must_use]
    pub fn binary_option(ticker: &str) -> Self {
        Self {
            initial_margin_ratio: Decimal::ONE,
            maintenance_margin_ratio: Decimal::ONE,
            ..Self::new(ticker, MarketType::BinaryOption)
        }
    }

    #[must_use]
    pub fn with_open_notional_cap(mut self, cap: OpenNotionalCap) -> Self {
        self.open_notional_cap = cap;
        self
    }

    /// Fee rate for an order: maker when resting, taker when placed this block.
    #[must_use]
    pub fn fee_rate(&self, is_resting: bool) -> Decimal {
        if is_resting {
            self.maker_fee_rate
        } else {
            self.taker_fee_rate
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker.is_empty() {
            return Err(DerivbookError::Configuration("empty ticker".into()));
        }
        if self.market_id != MarketId::from_ticker(&self.ticker) {
            return Err(DerivbookError::Configuration(format!(
                "market id does not match ticker {}",
                self.ticker
            )));
        }
        if self.taker_fee_rate < Decimal::ZERO || self.taker_fee_rate >= Decimal::ONE {
            return Err(DerivbookError::Configuration(format!(
                "taker fee rate {} out of range",
                self.taker_fee_rate
            )));
        }
        if self.maker_fee_rate <= -Decimal::ONE || self.maker_fee_rate >= Decimal::ONE {
            return Err(DerivbookError::Configuration(format!(
                "maker fee rate {} out of range",
                self.maker_fee_rate
            )));
        }
        if self.initial_margin_ratio <= Decimal::ZERO
            || self.maintenance_margin_ratio > self.initial_margin_ratio
        {
            return Err(DerivbookError::Configuration(format!(
                "margin ratios imr {} mmr {} are inconsistent",
                self.initial_margin_ratio, self.maintenance_margin_ratio
            )));
        }
        if let OpenNotionalCap::Capped { value } = self.open_notional_cap {
            if value < Decimal::ZERO {
                return Err(DerivbookError::Configuration(format!(
                    "negative open notional cap {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Exchange-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub markets: Vec<DerivativeMarket>,
    /// Capacity of the per-block transient order buffer.
    #[serde(default = "default_transient_capacity")]
    pub max_transient_orders_per_block: usize,
}

fn default_transient_capacity() -> usize {
    constants::DEFAULT_MAX_TRANSIENT_ORDERS_PER_BLOCK
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            markets: vec![DerivativeMarket::btc_usdt_perp()],
            max_transient_orders_per_block: default_transient_capacity(),
        }
    }
}

impl ExchangeConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DerivbookError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transient_orders_per_block == 0 {
            return Err(DerivbookError::Configuration(
                "transient order capacity must be positive".into(),
            ));
        }
        for (i, market) in self.markets.iter().enumerate() {
            market.validate()?;
            if self.markets[..i]
                .iter()
                .any(|m| m.market_id == market.market_id)
            {
                return Err(DerivbookError::Configuration(format!(
                    "duplicate market {}",
                    market.ticker
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn market(&self, market_id: &MarketId) -> Option<&DerivativeMarket> {
        self.markets.iter().find(|m| &m.market_id == market_id)
    }
}
