//! Trading types: journal transactions, pending limit orders, leverage
//! positions, session snapshots and events.

use crate::types::market::split_market;
use crate::types::numeric::{coerce_finite, finite_positive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Enums
// =============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Position side (long or short).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// P&L direction multiplier: +1 for longs, -1 for shorts.
    pub fn direction(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// A completed spot fill (market or executed limit order).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotFill {
    /// Market traded (e.g. `BTC/USDT`).
    pub market: String,
    /// Base-asset amount.
    pub amount: f64,
    /// Execution price.
    pub price: f64,
    /// Notional (`amount * price`).
    pub total: f64,
    /// Fee charged, in quote currency.
    pub fee: f64,
    /// Execution time (ms).
    pub time: i64,
}

/// Snapshot of a leveraged position's economics at close or liquidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionClose {
    pub market: String,
    /// Notional size closed, in quote currency.
    pub amount: f64,
    /// Exit price at settlement.
    pub price: f64,
    /// Net amount settled to the ledger (negative means debited).
    pub total: f64,
    /// Total fees charged on this settlement.
    pub fee: f64,
    pub time: i64,
    pub leverage: u32,
    /// Realized P&L net of fees.
    pub pnl: f64,
    /// Realized P&L before fees.
    pub raw_pnl: f64,
    /// Opening-fee share attributed to the closed portion.
    pub opening_fee: f64,
    pub closing_fee: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Portion of the position closed, in percent.
    pub percentage: f64,
}

/// An immutable journal record: appended once, never mutated or deleted.
///
/// Each variant carries exactly the fields its kind requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    Buy(SpotFill),
    Sell(SpotFill),
    CloseLong(PositionClose),
    CloseShort(PositionClose),
    Liquidation(PositionClose),
}

impl Transaction {
    /// Market this record refers to.
    pub fn market(&self) -> &str {
        match self {
            Transaction::Buy(fill) | Transaction::Sell(fill) => &fill.market,
            Transaction::CloseLong(close)
            | Transaction::CloseShort(close)
            | Transaction::Liquidation(close) => &close.market,
        }
    }

    /// Execution timestamp (ms).
    pub fn time(&self) -> i64 {
        match self {
            Transaction::Buy(fill) | Transaction::Sell(fill) => fill.time,
            Transaction::CloseLong(close)
            | Transaction::CloseShort(close)
            | Transaction::Liquidation(close) => close.time,
        }
    }

    /// Record kind as its wire name.
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Buy(_) => "buy",
            Transaction::Sell(_) => "sell",
            Transaction::CloseLong(_) => "close_long",
            Transaction::CloseShort(_) => "close_short",
            Transaction::Liquidation(_) => "liquidation",
        }
    }

    pub fn is_liquidation(&self) -> bool {
        matches!(self, Transaction::Liquidation(_))
    }

    /// Coerce any non-finite persisted numerics to a safe baseline.
    pub(crate) fn sanitized(mut self) -> Self {
        match &mut self {
            Transaction::Buy(fill) | Transaction::Sell(fill) => {
                fill.amount = coerce_finite(fill.amount);
                fill.price = coerce_finite(fill.price);
                fill.total = coerce_finite(fill.total);
                fill.fee = coerce_finite(fill.fee);
            }
            Transaction::CloseLong(close)
            | Transaction::CloseShort(close)
            | Transaction::Liquidation(close) => {
                close.amount = coerce_finite(close.amount);
                close.price = coerce_finite(close.price);
                close.total = coerce_finite(close.total);
                close.fee = coerce_finite(close.fee);
                close.pnl = coerce_finite(close.pnl);
                close.raw_pnl = coerce_finite(close.raw_pnl);
                close.opening_fee = coerce_finite(close.opening_fee);
                close.closing_fee = coerce_finite(close.closing_fee);
                close.entry_price = coerce_finite(close.entry_price);
                close.exit_price = coerce_finite(close.exit_price);
                close.percentage = coerce_finite(close.percentage);
            }
        }
        self
    }
}

// =============================================================================
// Pending Orders
// =============================================================================

/// What a pending order has escrowed, by side.
///
/// A buy escrows quote currency (notional plus maker fee); a sell escrows the
/// base amount and records the net revenue it will settle at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum OrderFunding {
    #[serde(rename_all = "camelCase")]
    Buy { total_cost: f64 },
    #[serde(rename_all = "camelCase")]
    Sell { total_revenue: f64 },
}

impl OrderFunding {
    pub fn side(&self) -> OrderSide {
        match self {
            OrderFunding::Buy { .. } => OrderSide::Buy,
            OrderFunding::Sell { .. } => OrderSide::Sell,
        }
    }
}

/// An open limit order with funds escrowed in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    /// Unique order ID.
    pub id: String,
    /// Market the order targets.
    pub market: String,
    /// Base asset being bought or sold.
    pub crypto: String,
    /// Base-asset amount; all-or-nothing, no partial fills.
    pub amount: f64,
    /// Price the order executes at when crossed.
    pub limit_price: f64,
    /// Maker fee rate locked in at placement.
    pub fee_rate: f64,
    #[serde(flatten)]
    pub funding: OrderFunding,
    /// When the order was placed (ms).
    pub created_at: i64,
}

impl PendingOrder {
    pub fn new(
        market: String,
        crypto: String,
        amount: f64,
        limit_price: f64,
        fee_rate: f64,
        funding: OrderFunding,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            market,
            crypto,
            amount,
            limit_price,
            fee_rate,
            funding,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn side(&self) -> OrderSide {
        self.funding.side()
    }

    /// Whether a tick at `price` crosses this order.
    pub fn is_crossed(&self, price: f64) -> bool {
        match self.side() {
            OrderSide::Buy => price <= self.limit_price,
            OrderSide::Sell => price >= self.limit_price,
        }
    }
}

// =============================================================================
// Leverage Positions
// =============================================================================

/// An open leveraged position.
///
/// `size` is the notional (`margin * leverage`) in quote currency. The
/// derived fields (`current_price`, `pnl`, `pnl_percent`, `margin_ratio`)
/// are recomputed on every tick of the position's market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeveragePosition {
    /// Unique position ID.
    pub id: String,
    pub side: PositionSide,
    pub market: String,
    /// Collateral posted, in quote currency.
    pub margin: f64,
    pub leverage: u32,
    /// Notional value (`margin * leverage`).
    pub size: f64,
    /// Volume-weighted average entry price.
    pub entry_price: f64,
    /// Cumulative opening fee; scaled down proportionally on partial close.
    pub opening_fee: f64,
    /// Taker fee rate locked in when the position was opened.
    pub trading_fee_rate: f64,
    #[serde(default)]
    pub current_price: f64,
    /// Unrealized P&L net of the opening fee.
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub pnl_percent: f64,
    #[serde(default)]
    pub liquidation_price: f64,
    #[serde(default)]
    pub margin_ratio: f64,
    /// When the last margin-call warning fired; re-arms after a cooldown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_call_warned_at: Option<i64>,
    pub opened_at: i64,
    pub updated_at: i64,
}

impl LeveragePosition {
    /// Open a fresh position. The opening fee is charged immediately, so a
    /// new position starts with `pnl = -opening_fee`.
    pub fn new(
        market: String,
        side: PositionSide,
        margin: f64,
        leverage: u32,
        entry_price: f64,
        fee_rate: f64,
        maintenance_rate: f64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let size = margin * leverage as f64;
        let opening_fee = size * fee_rate;

        let mut position = Self {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            market,
            margin,
            leverage,
            size,
            entry_price,
            opening_fee,
            trading_fee_rate: fee_rate,
            current_price: entry_price,
            pnl: -opening_fee,
            pnl_percent: 0.0,
            liquidation_price: 0.0,
            margin_ratio: 0.0,
            margin_call_warned_at: None,
            opened_at: now,
            updated_at: now,
        };
        position.recompute_liquidation_price(maintenance_rate);
        position.mark(entry_price);
        position
    }

    /// Unrealized P&L before fees at `price`.
    pub fn raw_pnl_at(&self, price: f64) -> f64 {
        let price_change = price - self.entry_price;
        (price_change / self.entry_price) * self.size * self.side.direction()
    }

    /// Recompute the derived fields against a new market price.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.pnl = self.raw_pnl_at(price) - self.opening_fee;
        self.pnl_percent = if self.margin > 0.0 {
            self.pnl / self.margin * 100.0
        } else {
            0.0
        };
        self.margin_ratio = if self.size > 0.0 {
            (self.margin + self.pnl) / self.size * self.leverage as f64
        } else {
            0.0
        };
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Price at which this position is forcibly liquidated.
    pub fn recompute_liquidation_price(&mut self, maintenance_rate: f64) {
        let initial_margin = 1.0 / self.leverage as f64;
        self.liquidation_price = match self.side {
            PositionSide::Long => {
                self.entry_price * (1.0 - initial_margin + maintenance_rate + self.trading_fee_rate)
            }
            PositionSide::Short => {
                self.entry_price * (1.0 + initial_margin + maintenance_rate + self.trading_fee_rate)
            }
        };
    }

    /// Whether a tick at `price` crosses the liquidation threshold.
    pub fn should_liquidate(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price <= self.liquidation_price,
            PositionSide::Short => price >= self.liquidation_price,
        }
    }

    /// Stack additional margin into this position at the current tick price,
    /// averaging the entry volume-weighted.
    pub fn average_in(
        &mut self,
        added_margin: f64,
        added_size: f64,
        added_fee: f64,
        tick_price: f64,
        maintenance_rate: f64,
    ) {
        let new_size = self.size + added_size;
        self.entry_price =
            (self.entry_price * self.size + tick_price * added_size) / new_size;
        self.size = new_size;
        self.margin += added_margin;
        self.opening_fee += added_fee;
        self.recompute_liquidation_price(maintenance_rate);
        self.mark(tick_price);
    }

    /// Shrink the position in place after a partial close, keeping `keep`
    /// (in `(0,1)`) of size, margin and opening fee.
    pub fn scale_down(&mut self, keep: f64) {
        self.size *= keep;
        self.margin *= keep;
        self.opening_fee *= keep;
    }
}

// =============================================================================
// Session Snapshot
// =============================================================================

/// The persisted shape handed to the persistence gateway on every state
/// change, and loaded back on session start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSnapshot {
    pub balances: BTreeMap<String, f64>,
    pub transactions: Vec<Transaction>,
    pub pending_orders: Vec<PendingOrder>,
    pub leverage_positions: Vec<LeveragePosition>,
    pub timezone: String,
}

impl SessionSnapshot {
    /// Defensive coercion for partially-missing or corrupted persisted state:
    /// non-finite numerics become a safe zero, structurally-invalid entries
    /// are dropped, and missing fields take their baseline.
    pub fn sanitize(mut self) -> Self {
        for value in self.balances.values_mut() {
            let coerced = coerce_finite(*value);
            *value = if coerced < 0.0 { 0.0 } else { coerced };
        }

        let transactions = std::mem::take(&mut self.transactions);
        self.transactions = transactions
            .into_iter()
            .map(Transaction::sanitized)
            .collect();

        self.pending_orders.retain(|order| {
            let funding_ok = match order.funding {
                OrderFunding::Buy { total_cost } => finite_positive(total_cost),
                OrderFunding::Sell { total_revenue } => {
                    total_revenue.is_finite() && total_revenue >= 0.0
                }
            };
            split_market(&order.market).is_some()
                && finite_positive(order.amount)
                && finite_positive(order.limit_price)
                && funding_ok
        });

        self.leverage_positions.retain(|position| {
            split_market(&position.market).is_some()
                && finite_positive(position.margin)
                && finite_positive(position.entry_price)
                && position.leverage >= 1
        });
        for position in &mut self.leverage_positions {
            if !finite_positive(position.size) {
                position.size = position.margin * position.leverage as f64;
            }
            position.opening_fee = coerce_finite(position.opening_fee);
            position.trading_fee_rate = coerce_finite(position.trading_fee_rate);
            position.current_price = coerce_finite(position.current_price);
            position.pnl = coerce_finite(position.pnl);
            position.pnl_percent = coerce_finite(position.pnl_percent);
            position.liquidation_price = coerce_finite(position.liquidation_price);
            position.margin_ratio = coerce_finite(position.margin_ratio);
        }

        if self.timezone.is_empty() {
            self.timezone = "UTC".to_string();
        }
        self
    }
}

// =============================================================================
// Session Summary & Events
// =============================================================================

/// Point-in-time metrics for one trading session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub quote_currency: String,
    /// Quote cash not tied up in positions or escrow.
    pub cash_balance: f64,
    /// Sum of collateral across open positions.
    pub margin_in_use: f64,
    /// Sum of unrealized P&L across open positions.
    pub unrealized_pnl: f64,
    /// Cash + margin + unrealized P&L.
    pub equity: f64,
    pub open_positions: usize,
    pub open_orders: usize,
    pub transactions: usize,
}

/// State-change notifications broadcast to collaborators (UI, persistence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PriceUpdated {
        market: String,
        price: f64,
    },
    TradeExecuted {
        transaction: Transaction,
    },
    OrderPlaced {
        order: PendingOrder,
    },
    OrderCancelled {
        order_id: String,
    },
    OrderFilled {
        order_id: String,
        transaction: Transaction,
    },
    PositionOpened {
        position: LeveragePosition,
    },
    PositionClosed {
        position_id: String,
        transaction: Transaction,
    },
    MarginCall {
        position_id: String,
        market: String,
        margin_ratio: f64,
    },
    Liquidated {
        position_id: String,
        transaction: Transaction,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_position() -> LeveragePosition {
        LeveragePosition::new(
            "BTC/USD".to_string(),
            PositionSide::Long,
            1000.0,
            10,
            100.0,
            0.001,
            0.005,
        )
    }

    #[test]
    fn test_new_position_starts_down_opening_fee() {
        let position = test_position();

        // size = 1000 * 10, fee = 10000 * 0.001
        assert_eq!(position.size, 10_000.0);
        assert_eq!(position.opening_fee, 10.0);
        assert_eq!(position.pnl, -10.0);
        assert_eq!(position.current_price, 100.0);
    }

    #[test]
    fn test_liquidation_price_long() {
        let position = test_position();

        // entry * (1 - 1/leverage + maintenance + fee)
        let expected = 100.0 * (1.0 - 0.1 + 0.005 + 0.001);
        assert_eq!(position.liquidation_price, expected);
        assert!(position.should_liquidate(expected));
        assert!(!position.should_liquidate(expected + 0.01));
    }

    #[test]
    fn test_liquidation_price_short() {
        let position = LeveragePosition::new(
            "BTC/USD".to_string(),
            PositionSide::Short,
            1000.0,
            10,
            100.0,
            0.001,
            0.005,
        );

        let expected = 100.0 * (1.0 + 0.1 + 0.005 + 0.001);
        assert_eq!(position.liquidation_price, expected);
        assert!(position.should_liquidate(expected));
        assert!(!position.should_liquidate(expected - 0.01));
    }

    #[test]
    fn test_mark_short_profits_when_price_drops() {
        let mut position = LeveragePosition::new(
            "ETH/USD".to_string(),
            PositionSide::Short,
            1000.0,
            2,
            3000.0,
            0.0,
            0.005,
        );

        position.mark(2700.0);

        // (300/3000) * 2000 = 200 profit, no fees
        assert_eq!(position.pnl, 200.0);
        assert_eq!(position.pnl_percent, 20.0);
    }

    #[test]
    fn test_pending_order_crossing() {
        let buy = PendingOrder::new(
            "BTC/USD".to_string(),
            "BTC".to_string(),
            1.0,
            100.0,
            0.0005,
            OrderFunding::Buy { total_cost: 100.05 },
        );
        assert!(buy.is_crossed(100.0));
        assert!(buy.is_crossed(99.0));
        assert!(!buy.is_crossed(101.0));

        let sell = PendingOrder::new(
            "BTC/USD".to_string(),
            "BTC".to_string(),
            1.0,
            100.0,
            0.0005,
            OrderFunding::Sell { total_revenue: 99.95 },
        );
        assert!(sell.is_crossed(100.0));
        assert!(sell.is_crossed(101.0));
        assert!(!sell.is_crossed(99.0));
    }

    #[test]
    fn test_transaction_tagging() {
        let tx = Transaction::Buy(SpotFill {
            market: "BTC/USD".to_string(),
            amount: 1.0,
            price: 100.0,
            total: 100.0,
            fee: 0.1,
            time: 0,
        });

        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"type\":\"buy\""));

        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "buy");
        assert_eq!(back.market(), "BTC/USD");
    }

    #[test]
    fn test_snapshot_sanitize_drops_invalid_entries() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.balances.insert("USD".to_string(), f64::NAN);
        snapshot.balances.insert("BTC".to_string(), 2.0);
        snapshot.pending_orders.push(PendingOrder::new(
            "BTC/USD".to_string(),
            "BTC".to_string(),
            f64::NAN,
            100.0,
            0.0005,
            OrderFunding::Buy { total_cost: 100.05 },
        ));
        snapshot.leverage_positions.push(LeveragePosition::new(
            "no-slash".to_string(),
            PositionSide::Long,
            100.0,
            2,
            50.0,
            0.001,
            0.005,
        ));

        let clean = snapshot.sanitize();

        assert_eq!(clean.balances["USD"], 0.0);
        assert_eq!(clean.balances["BTC"], 2.0);
        assert!(clean.pending_orders.is_empty());
        assert!(clean.leverage_positions.is_empty());
        assert_eq!(clean.timezone, "UTC");
    }

    #[test]
    fn test_snapshot_tolerates_partially_missing_state() {
        let snapshot: SessionSnapshot = serde_json::from_str("{}").unwrap();
        let clean = snapshot.sanitize();

        assert!(clean.balances.is_empty());
        assert!(clean.transactions.is_empty());
        assert_eq!(clean.timezone, "UTC");
    }
}
