//! Transaction Journal
//!
//! Append-only ordered log of completed trade/close/liquidation records.
//! Chronological order is authoritative for accounting; `recent_first` serves
//! displays. The average purchase price of spot holdings is derived by
//! replaying buys and sells, with a cache in front of the O(n) replay.

use crate::types::{base_asset, Transaction};
use dashmap::DashMap;
use std::sync::RwLock;

/// Running balances below this are treated as fully sold out.
const ZERO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct AvgCostEntry {
    tx_count: usize,
    balance_bits: u64,
    average: f64,
}

/// Append-only transaction log with an average-cost cache.
#[derive(Debug, Default)]
pub struct TransactionJournal {
    entries: RwLock<Vec<Transaction>>,
    avg_cost_cache: DashMap<String, AvgCostEntry>,
}

impl TransactionJournal {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            avg_cost_cache: DashMap::new(),
        }
    }

    /// Rebuild a journal from persisted records, oldest first.
    pub fn restore(entries: Vec<Transaction>) -> Self {
        Self {
            entries: RwLock::new(entries),
            avg_cost_cache: DashMap::new(),
        }
    }

    /// Append a completed record and invalidate the average-cost cache for
    /// the currency it touches.
    pub fn append(&self, transaction: Transaction) {
        self.avg_cost_cache
            .remove(base_asset(transaction.market()));
        self.entries.write().unwrap().push(transaction);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// All records in chronological (accounting) order.
    pub fn entries(&self) -> Vec<Transaction> {
        self.entries.read().unwrap().clone()
    }

    /// Records newest-first, for recency displays.
    pub fn recent_first(&self) -> Vec<Transaction> {
        let mut entries = self.entries();
        entries.reverse();
        entries
    }

    /// Average purchase price for a spot holding.
    ///
    /// The cache is keyed by `(currency, transaction count, holding balance)`
    /// and is an optimization only: a from-scratch replay always produces the
    /// same answer.
    pub fn average_cost(&self, currency: &str, holding_balance: f64) -> f64 {
        let entries = self.entries.read().unwrap();
        let tx_count = entries.len();
        let balance_bits = holding_balance.to_bits();

        if let Some(cached) = self.avg_cost_cache.get(currency) {
            if cached.tx_count == tx_count && cached.balance_bits == balance_bits {
                return cached.average;
            }
        }

        let average = replay_average_cost(&entries, currency);
        self.avg_cost_cache.insert(
            currency.to_string(),
            AvgCostEntry {
                tx_count,
                balance_bits,
                average,
            },
        );
        average
    }
}

/// Derive the average purchase price of `currency` by replaying the journal
/// in chronological order: each buy updates a running weighted average, each
/// sell reduces the running balance at constant average, and the average
/// resets to zero when the balance is sold out.
pub fn replay_average_cost(entries: &[Transaction], currency: &str) -> f64 {
    let mut balance = 0.0_f64;
    let mut average = 0.0_f64;

    for transaction in entries {
        match transaction {
            Transaction::Buy(fill) if base_asset(&fill.market) == currency => {
                let new_balance = balance + fill.amount;
                if new_balance > 0.0 {
                    average = (average * balance + fill.price * fill.amount) / new_balance;
                }
                balance = new_balance;
            }
            Transaction::Sell(fill) if base_asset(&fill.market) == currency => {
                balance -= fill.amount;
                if balance <= ZERO_EPSILON {
                    balance = 0.0;
                    average = 0.0;
                }
            }
            _ => {}
        }
    }

    average
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpotFill;

    fn buy(market: &str, amount: f64, price: f64) -> Transaction {
        Transaction::Buy(SpotFill {
            market: market.to_string(),
            amount,
            price,
            total: amount * price,
            fee: 0.0,
            time: 0,
        })
    }

    fn sell(market: &str, amount: f64, price: f64) -> Transaction {
        Transaction::Sell(SpotFill {
            market: market.to_string(),
            amount,
            price,
            total: amount * price,
            fee: 0.0,
            time: 0,
        })
    }

    #[test]
    fn test_buys_update_weighted_average() {
        let journal = TransactionJournal::new();
        journal.append(buy("BTC/USD", 1.0, 100.0));
        journal.append(buy("BTC/USD", 1.0, 200.0));

        assert_eq!(journal.average_cost("BTC", 2.0), 150.0);
    }

    #[test]
    fn test_sells_keep_cost_basis_constant() {
        let journal = TransactionJournal::new();
        journal.append(buy("BTC/USD", 2.0, 100.0));
        journal.append(sell("BTC/USD", 1.0, 500.0));

        // Selling at any price does not move the average of what remains.
        assert_eq!(journal.average_cost("BTC", 1.0), 100.0);
    }

    #[test]
    fn test_average_resets_when_sold_out() {
        let journal = TransactionJournal::new();
        journal.append(buy("ETH/USD", 3.0, 10.0));
        journal.append(sell("ETH/USD", 3.0, 40.0));
        assert_eq!(journal.average_cost("ETH", 0.0), 0.0);

        journal.append(buy("ETH/USD", 1.0, 25.0));
        assert_eq!(journal.average_cost("ETH", 1.0), 25.0);
    }

    #[test]
    fn test_cache_agrees_with_fresh_replay() {
        let journal = TransactionJournal::new();
        journal.append(buy("BTC/USD", 0.5, 40_000.0));
        journal.append(buy("BTC/USD", 0.25, 44_000.0));
        journal.append(sell("BTC/USD", 0.3, 45_000.0));
        journal.append(buy("ETH/USD", 2.0, 3000.0));

        let cached = journal.average_cost("BTC", 0.45);
        let cached_again = journal.average_cost("BTC", 0.45);
        let replayed = replay_average_cost(&journal.entries(), "BTC");

        assert_eq!(cached, replayed);
        assert_eq!(cached_again, replayed);
    }

    #[test]
    fn test_append_invalidates_only_touched_currency() {
        let journal = TransactionJournal::new();
        journal.append(buy("BTC/USD", 1.0, 100.0));
        journal.append(buy("ETH/USD", 1.0, 10.0));

        // Prime both cache entries.
        assert_eq!(journal.average_cost("BTC", 1.0), 100.0);
        assert_eq!(journal.average_cost("ETH", 1.0), 10.0);

        journal.append(buy("BTC/USD", 1.0, 300.0));
        assert_eq!(journal.average_cost("BTC", 2.0), 200.0);
        assert_eq!(journal.average_cost("ETH", 1.0), 10.0);
    }

    #[test]
    fn test_recent_first_reverses_chronology() {
        let journal = TransactionJournal::new();
        journal.append(buy("BTC/USD", 1.0, 100.0));
        journal.append(sell("BTC/USD", 1.0, 110.0));

        let recent = journal.recent_first();
        assert_eq!(recent[0].kind(), "sell");
        assert_eq!(recent[1].kind(), "buy");
    }
}
