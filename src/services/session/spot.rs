//! Spot Order Engine
//!
//! Immediate market buys/sells and escrowed limit orders. Escrow is
//! mandatory: an order exceeding available funds is rejected at placement,
//! not at execution.

use super::{into_insufficient_funds, parse_market, TradingSession};
use crate::error::TradingError;
use crate::services::OrderClass;
use crate::types::{
    finite_positive, split_market, OrderFunding, OrderSide, PendingOrder, SessionEvent, SpotFill,
    Transaction,
};
use tracing::{debug, info};

impl TradingSession {
    /// Buy `amount` of the market's base asset at the current price.
    pub fn execute_market_buy(
        &self,
        market: &str,
        amount: f64,
    ) -> Result<Transaction, TradingError> {
        let (base, quote) = parse_market(market)?;
        validate_amount(amount)?;
        let price = self
            .prices
            .last_price(market)
            .ok_or_else(|| TradingError::PriceUnavailable(market.to_string()))?;

        let notional = amount * price;
        let fee = self.fees.fee(notional, OrderClass::Taker);
        self.ledger
            .debit(quote, notional + fee)
            .map_err(into_insufficient_funds)?;
        self.ledger.credit(base, amount);

        let transaction = Transaction::Buy(SpotFill {
            market: market.to_string(),
            amount,
            price,
            total: notional,
            fee,
            time: chrono::Utc::now().timestamp_millis(),
        });
        self.journal.append(transaction.clone());
        self.emit(SessionEvent::TradeExecuted {
            transaction: transaction.clone(),
        });
        info!("bought {} {} at {} (fee {})", amount, base, price, fee);

        self.persist();
        Ok(transaction)
    }

    /// Sell `amount` of the market's base asset at the current price.
    pub fn execute_market_sell(
        &self,
        market: &str,
        amount: f64,
    ) -> Result<Transaction, TradingError> {
        let (base, quote) = parse_market(market)?;
        validate_amount(amount)?;
        let price = self
            .prices
            .last_price(market)
            .ok_or_else(|| TradingError::PriceUnavailable(market.to_string()))?;

        let notional = amount * price;
        let fee = self.fees.fee(notional, OrderClass::Taker);
        self.ledger.debit(base, amount)?;
        self.ledger.credit(quote, notional - fee);

        let transaction = Transaction::Sell(SpotFill {
            market: market.to_string(),
            amount,
            price,
            total: notional,
            fee,
            time: chrono::Utc::now().timestamp_millis(),
        });
        self.journal.append(transaction.clone());
        self.emit(SessionEvent::TradeExecuted {
            transaction: transaction.clone(),
        });
        info!("sold {} {} at {} (fee {})", amount, base, price, fee);

        self.persist();
        Ok(transaction)
    }

    /// Place a limit order, escrowing the full notional plus maker fee (buy)
    /// or the base amount (sell) immediately.
    ///
    /// The maker fee is computed against the limit price, not the current
    /// price: the fill settles at exactly the price the user asked for.
    pub fn place_limit_order(
        &self,
        market: &str,
        side: OrderSide,
        amount: f64,
        limit_price: f64,
    ) -> Result<PendingOrder, TradingError> {
        let (base, quote) = parse_market(market)?;
        validate_amount(amount)?;
        if !finite_positive(limit_price) {
            return Err(TradingError::InvalidInput(format!(
                "limit price must be positive, got {}",
                limit_price
            )));
        }

        let notional = amount * limit_price;
        let fee = self.fees.fee(notional, OrderClass::Maker);

        let funding = match side {
            OrderSide::Buy => {
                let total_cost = notional + fee;
                self.ledger
                    .debit(quote, total_cost)
                    .map_err(into_insufficient_funds)?;
                OrderFunding::Buy { total_cost }
            }
            OrderSide::Sell => {
                self.ledger.debit(base, amount)?;
                OrderFunding::Sell {
                    total_revenue: notional - fee,
                }
            }
        };

        let order = PendingOrder::new(
            market.to_string(),
            base.to_string(),
            amount,
            limit_price,
            self.fees.rate(OrderClass::Maker),
            funding,
        );
        self.pending.write().unwrap().push(order.clone());

        self.emit(SessionEvent::OrderPlaced {
            order: order.clone(),
        });
        info!(
            "placed limit {} {} {} @ {} (order {})",
            side, amount, base, limit_price, order.id
        );

        self.persist();
        Ok(order)
    }

    /// Cancel a limit order, refunding its exact original escrow.
    ///
    /// Cancellation is idempotent: an unknown id is a silent no-op.
    pub fn cancel_limit_order(&self, order_id: &str) {
        let removed = {
            let mut book = self.pending.write().unwrap();
            match book.iter().position(|order| order.id == order_id) {
                Some(index) => Some(book.remove(index)),
                None => None,
            }
        };

        let Some(order) = removed else {
            debug!("cancel for unknown order {}", order_id);
            return;
        };

        match order.funding {
            OrderFunding::Buy { total_cost } => {
                if let Some((_, quote)) = split_market(&order.market) {
                    self.ledger.credit(quote, total_cost);
                }
            }
            OrderFunding::Sell { .. } => {
                self.ledger.credit(&order.crypto, order.amount);
            }
        }

        self.emit(SessionEvent::OrderCancelled {
            order_id: order.id.clone(),
        });
        info!("cancelled limit order {}", order.id);

        self.persist();
    }
}

fn validate_amount(amount: f64) -> Result<(), TradingError> {
    if finite_positive(amount) {
        Ok(())
    } else {
        Err(TradingError::InvalidInput(format!(
            "amount must be positive, got {}",
            amount
        )))
    }
}
