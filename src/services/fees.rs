//! Fee Calculator
//!
//! Pure mapping from an order classification to a fee rate. Limit orders add
//! liquidity (maker, lower fee); market orders remove it (taker, higher fee).

use serde::{Deserialize, Serialize};

/// Fee classification of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClass {
    Maker,
    Taker,
}

/// Fixed maker/taker fee rates.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub maker_rate: f64,
    pub taker_rate: f64,
}

impl FeeSchedule {
    pub fn new(maker_rate: f64, taker_rate: f64) -> Self {
        Self {
            maker_rate,
            taker_rate,
        }
    }

    /// The fee rate for an order classification.
    pub fn rate(&self, class: OrderClass) -> f64 {
        match class {
            OrderClass::Maker => self.maker_rate,
            OrderClass::Taker => self.taker_rate,
        }
    }

    /// Fee amount on a notional value.
    pub fn fee(&self, notional: f64, class: OrderClass) -> f64 {
        notional * self.rate(class)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: 0.0005, // 0.05%
            taker_rate: 0.001,  // 0.1%
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maker_cheaper_than_taker() {
        let fees = FeeSchedule::default();
        assert!(fees.rate(OrderClass::Maker) < fees.rate(OrderClass::Taker));
    }

    #[test]
    fn test_fee_is_notional_times_rate() {
        let fees = FeeSchedule::new(0.25, 0.5);
        assert_eq!(fees.fee(200.0, OrderClass::Maker), 50.0);
        assert_eq!(fees.fee(200.0, OrderClass::Taker), 100.0);
        assert_eq!(fees.fee(0.0, OrderClass::Taker), 0.0);
    }
}
