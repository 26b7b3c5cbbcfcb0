//! Balance Ledger
//!
//! Per-currency balances for one user. No operation may drive a balance
//! below zero: a debit that would is rejected before any mutation.

use crate::error::TradingError;
use std::collections::BTreeMap;

use dashmap::DashMap;

/// Per-currency non-negative balances.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: DashMap<String, f64>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    /// Rebuild a ledger from persisted balances.
    pub fn restore(balances: BTreeMap<String, f64>) -> Self {
        let ledger = Self::new();
        for (currency, amount) in balances {
            if amount > 0.0 {
                ledger.balances.insert(currency, amount);
            }
        }
        ledger
    }

    /// Current balance for a currency (0.0 when never touched).
    pub fn get(&self, currency: &str) -> f64 {
        self.balances.get(currency).map(|b| *b).unwrap_or(0.0)
    }

    /// Add to a balance. Negative amounts are ignored.
    pub fn credit(&self, currency: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        *self.balances.entry(currency.to_string()).or_insert(0.0) += amount;
    }

    /// Remove from a balance, rejecting the whole operation when the balance
    /// is insufficient. Rejection leaves the ledger untouched.
    pub fn debit(&self, currency: &str, amount: f64) -> Result<(), TradingError> {
        match self.balances.get_mut(currency) {
            Some(mut entry) if *entry >= amount => {
                *entry -= amount;
                Ok(())
            }
            Some(entry) => Err(TradingError::InsufficientBalance {
                asset: currency.to_string(),
                needed: amount,
                available: *entry,
            }),
            None => Err(TradingError::InsufficientBalance {
                asset: currency.to_string(),
                needed: amount,
                available: 0.0,
            }),
        }
    }

    /// Debit as much of `amount` as the balance allows, returning what was
    /// actually taken. Used only by system-initiated settlement (liquidation,
    /// negative close) where the event must succeed while the non-negative
    /// invariant holds.
    pub fn debit_up_to(&self, currency: &str, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        match self.balances.get_mut(currency) {
            Some(mut entry) => {
                let taken = amount.min(*entry);
                *entry -= taken;
                taken
            }
            None => 0.0,
        }
    }

    /// All balances, for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.balances
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_get() {
        let ledger = BalanceLedger::new();
        assert_eq!(ledger.get("USD"), 0.0);

        ledger.credit("USD", 1000.0);
        ledger.credit("USD", 500.0);
        assert_eq!(ledger.get("USD"), 1500.0);
    }

    #[test]
    fn test_debit_rejection_is_a_no_op() {
        let ledger = BalanceLedger::new();
        ledger.credit("USD", 100.0);

        let err = ledger.debit("USD", 100.5).unwrap_err();
        assert!(matches!(err, TradingError::InsufficientBalance { .. }));
        assert_eq!(ledger.get("USD"), 100.0);

        ledger.debit("USD", 100.0).unwrap();
        assert_eq!(ledger.get("USD"), 0.0);
    }

    #[test]
    fn test_debit_unknown_currency() {
        let ledger = BalanceLedger::new();
        assert!(ledger.debit("BTC", 1.0).is_err());
    }

    #[test]
    fn test_debit_up_to_clamps() {
        let ledger = BalanceLedger::new();
        ledger.credit("USD", 60.0);

        assert_eq!(ledger.debit_up_to("USD", 100.0), 60.0);
        assert_eq!(ledger.get("USD"), 0.0);
        assert_eq!(ledger.debit_up_to("USD", 10.0), 0.0);
    }

    #[test]
    fn test_restore_skips_empty_balances() {
        let mut balances = BTreeMap::new();
        balances.insert("USD".to_string(), 250.0);
        balances.insert("BTC".to_string(), 0.0);

        let ledger = BalanceLedger::restore(balances);
        assert_eq!(ledger.get("USD"), 250.0);
        assert_eq!(ledger.snapshot().len(), 1);
    }
}
