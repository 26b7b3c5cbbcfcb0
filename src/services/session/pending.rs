//! Pending Order Monitor
//!
//! Invoked once per accepted tick. Scans a snapshot of the open limit orders
//! (so settlement never mutates the collection mid-iteration) and executes
//! crossed orders in arrival order, all-or-nothing, at the limit price.

use super::TradingSession;
use crate::config::PendingScanPolicy;
use crate::error::TradingError;
use crate::types::{
    split_market, OrderFunding, PendingOrder, SessionEvent, SpotFill, Transaction,
};
use tracing::{info, warn};

impl TradingSession {
    /// Evaluate open limit orders against a tick.
    ///
    /// Under `ActiveMarketOnly` the scan runs only when the tick's market is
    /// the session's active market; orders on other markets wait until their
    /// market becomes active again.
    pub(crate) fn check_pending_orders(&self, market: &str, tick_price: f64) {
        match self.config.pending_scan_policy {
            PendingScanPolicy::ActiveMarketOnly => {
                let active = self.active_market.read().unwrap().clone();
                if active.as_deref() != Some(market) {
                    return;
                }
            }
            PendingScanPolicy::AllMarkets => {}
        }

        let crossed: Vec<PendingOrder> = self
            .pending
            .read()
            .unwrap()
            .iter()
            .filter(|order| order.market == market && order.is_crossed(tick_price))
            .cloned()
            .collect();

        for order in crossed {
            if let Err(e) = self.fill_pending_order(&order) {
                // One failed settlement must not stop the scan.
                warn!("failed to settle order {}: {}", order.id, e);
            }
        }
    }

    /// Convert a crossed order into a transaction at its limit price.
    ///
    /// The escrow taken at placement already covers settlement exactly, so
    /// the fill only pays out the other leg.
    fn fill_pending_order(&self, order: &PendingOrder) -> Result<(), TradingError> {
        let removed = {
            let mut book = self.pending.write().unwrap();
            match book.iter().position(|o| o.id == order.id) {
                Some(index) => Some(book.remove(index)),
                None => None,
            }
        };
        if removed.is_none() {
            // Already settled or cancelled earlier in this tick.
            return Ok(());
        }

        let notional = order.amount * order.limit_price;
        let time = chrono::Utc::now().timestamp_millis();

        let transaction = match order.funding {
            OrderFunding::Buy { total_cost } => {
                self.ledger.credit(&order.crypto, order.amount);
                Transaction::Buy(SpotFill {
                    market: order.market.clone(),
                    amount: order.amount,
                    price: order.limit_price,
                    total: notional,
                    // Recover the exact fee locked into the escrow.
                    fee: total_cost - notional,
                    time,
                })
            }
            OrderFunding::Sell { total_revenue } => {
                let (_, quote) = split_market(&order.market).ok_or_else(|| {
                    TradingError::InvalidInput(format!(
                        "malformed market symbol {}",
                        order.market
                    ))
                })?;
                self.ledger.credit(quote, total_revenue);
                Transaction::Sell(SpotFill {
                    market: order.market.clone(),
                    amount: order.amount,
                    price: order.limit_price,
                    total: notional,
                    fee: notional - total_revenue,
                    time,
                })
            }
        };

        self.journal.append(transaction.clone());
        self.emit(SessionEvent::OrderFilled {
            order_id: order.id.clone(),
            transaction: transaction.clone(),
        });
        info!(
            "limit order {} filled: {} {} @ {}",
            order.id,
            order.side(),
            order.amount,
            order.limit_price
        );

        Ok(())
    }
}
