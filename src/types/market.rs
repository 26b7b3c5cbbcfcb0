//! Market symbols and price ticks.

use crate::error::TradingError;
use crate::types::numeric::finite_positive;
use serde::{Deserialize, Serialize};

/// Split a `BASE/QUOTE` market symbol (e.g. `BTC/USDT`) into its assets.
///
/// Returns `None` when the symbol is not of that shape.
pub fn split_market(market: &str) -> Option<(&str, &str)> {
    let (base, quote) = market.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

/// The base asset of a market symbol (`BTC` for `BTC/USDT`).
pub fn base_asset(market: &str) -> &str {
    split_market(market).map(|(base, _)| base).unwrap_or(market)
}

/// A validated price update from the feed collaborator.
///
/// Only `market` and a finite positive `price` are required; the remaining
/// fields are informational and pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub market: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default)]
    pub time: i64,
}

impl PriceTick {
    /// Create a tick, rejecting non-finite or non-positive prices.
    pub fn new(market: impl Into<String>, price: f64) -> Result<Self, TradingError> {
        let market = market.into();
        if market.is_empty() {
            return Err(TradingError::InvalidInput("empty market symbol".to_string()));
        }
        if !finite_positive(price) {
            return Err(TradingError::InvalidInput(format!(
                "invalid price {} for {}",
                price, market
            )));
        }
        Ok(Self {
            market,
            price,
            change_rate: None,
            high_price: None,
            low_price: None,
            volume: None,
            time: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Whether this tick may update engine state.
    pub fn is_valid(&self) -> bool {
        !self.market.is_empty() && finite_positive(self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_market() {
        assert_eq!(split_market("BTC/USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_market("ETH/USD"), Some(("ETH", "USD")));
        assert_eq!(split_market("BTCUSDT"), None);
        assert_eq!(split_market("/USDT"), None);
        assert_eq!(split_market("BTC/"), None);
    }

    #[test]
    fn test_tick_validation() {
        assert!(PriceTick::new("BTC/USDT", 50_000.0).is_ok());
        assert!(PriceTick::new("BTC/USDT", 0.0).is_err());
        assert!(PriceTick::new("BTC/USDT", -5.0).is_err());
        assert!(PriceTick::new("BTC/USDT", f64::NAN).is_err());
        assert!(PriceTick::new("", 1.0).is_err());
    }
}
