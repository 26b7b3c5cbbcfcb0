//! Market Price Table
//!
//! Last-known reference price per market symbol, updated only by validated
//! ticks from the feed collaborator.

use crate::types::PriceTick;
use dashmap::DashMap;

/// Last observed tick per market.
#[derive(Debug, Default)]
pub struct MarketPriceTable {
    prices: DashMap<String, PriceTick>,
}

impl MarketPriceTable {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    /// Store a tick. Invalid ticks are dropped without touching state.
    pub fn update(&self, tick: PriceTick) -> bool {
        if !tick.is_valid() {
            return false;
        }
        self.prices.insert(tick.market.clone(), tick);
        true
    }

    /// Last price for a market, if any tick has arrived.
    pub fn last_price(&self, market: &str) -> Option<f64> {
        self.prices.get(market).map(|tick| tick.price)
    }

    /// Full last tick for a market.
    pub fn last_tick(&self, market: &str) -> Option<PriceTick> {
        self.prices.get(market).map(|tick| tick.clone())
    }

    /// All current prices.
    pub fn all_prices(&self) -> Vec<(String, f64)> {
        self.prices
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().price))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_read_back() {
        let table = MarketPriceTable::new();
        assert_eq!(table.last_price("BTC/USDT"), None);

        assert!(table.update(PriceTick::new("BTC/USDT", 64_000.0).unwrap()));
        assert_eq!(table.last_price("BTC/USDT"), Some(64_000.0));

        assert!(table.update(PriceTick::new("BTC/USDT", 64_100.0).unwrap()));
        assert_eq!(table.last_price("BTC/USDT"), Some(64_100.0));
    }

    #[test]
    fn test_invalid_tick_is_dropped() {
        let table = MarketPriceTable::new();
        table.update(PriceTick::new("ETH/USDT", 3000.0).unwrap());

        let mut bad = PriceTick::new("ETH/USDT", 3000.0).unwrap();
        bad.price = f64::NAN;
        assert!(!table.update(bad));
        assert_eq!(table.last_price("ETH/USDT"), Some(3000.0));
    }
}
