//! Trading Session
//!
//! The façade composing the ledger, price table, journal, pending-order book
//! and leverage positions for one simulated user. Sessions are explicit
//! objects owned by the caller; there are no process-wide singletons, so any
//! number of sessions can run side by side.
//!
//! Ticks and commands are discrete events processed to completion. On every
//! accepted tick the pipeline runs: price table -> pending-order monitor ->
//! position marking (liquidations, margin calls) -> persistence.

mod leverage;
mod pending;
mod spot;

pub use leverage::CloseGuard;

use crate::config::SimConfig;
use crate::error::TradingError;
use crate::services::{
    BalanceLedger, FeeSchedule, MarketPriceTable, SessionStore, TransactionJournal,
};
use crate::types::{
    LeveragePosition, PendingOrder, PriceTick, SessionEvent, SessionSnapshot, SessionSummary,
    Transaction,
};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// One simulated user's trading session.
pub struct TradingSession {
    session_id: String,
    config: SimConfig,
    fees: FeeSchedule,
    ledger: BalanceLedger,
    prices: MarketPriceTable,
    journal: TransactionJournal,
    pending: RwLock<Vec<PendingOrder>>,
    positions: DashMap<String, LeveragePosition>,
    /// Advisory locks guarding the close path, keyed by position id.
    close_locks: Arc<DashMap<String, ()>>,
    active_market: RwLock<Option<String>>,
    timezone: RwLock<String>,
    store: Option<Arc<dyn SessionStore>>,
    events: broadcast::Sender<SessionEvent>,
}

impl TradingSession {
    /// Create a fresh session funded with the configured starting balance.
    pub fn new(session_id: impl Into<String>, config: SimConfig) -> Self {
        let fees = FeeSchedule::new(config.maker_fee_rate, config.taker_fee_rate);
        let ledger = BalanceLedger::new();
        ledger.credit(&config.quote_currency, config.starting_balance);
        let (events, _) = broadcast::channel(256);

        Self {
            session_id: session_id.into(),
            config,
            fees,
            ledger,
            prices: MarketPriceTable::new(),
            journal: TransactionJournal::new(),
            pending: RwLock::new(Vec::new()),
            positions: DashMap::new(),
            close_locks: Arc::new(DashMap::new()),
            active_market: RwLock::new(None),
            timezone: RwLock::new("UTC".to_string()),
            store: None,
            events,
        }
    }

    /// Rebuild a session from a persisted snapshot, coercing anything
    /// missing or malformed to a safe baseline.
    pub fn from_snapshot(
        session_id: impl Into<String>,
        config: SimConfig,
        snapshot: SessionSnapshot,
    ) -> Self {
        let snapshot = snapshot.sanitize();
        let fees = FeeSchedule::new(config.maker_fee_rate, config.taker_fee_rate);

        let ledger = if snapshot.balances.is_empty() {
            let ledger = BalanceLedger::new();
            ledger.credit(&config.quote_currency, config.starting_balance);
            ledger
        } else {
            BalanceLedger::restore(snapshot.balances)
        };

        let positions = DashMap::new();
        for mut position in snapshot.leverage_positions {
            position.recompute_liquidation_price(config.maintenance_margin_rate);
            let mark_price = if position.current_price > 0.0 {
                position.current_price
            } else {
                position.entry_price
            };
            position.mark(mark_price);
            positions.insert(position.id.clone(), position);
        }

        let (events, _) = broadcast::channel(256);

        Self {
            session_id: session_id.into(),
            config,
            fees,
            ledger,
            prices: MarketPriceTable::new(),
            journal: TransactionJournal::restore(snapshot.transactions),
            pending: RwLock::new(snapshot.pending_orders),
            positions,
            close_locks: Arc::new(DashMap::new()),
            active_market: RwLock::new(None),
            timezone: RwLock::new(snapshot.timezone),
            store: None,
            events,
        }
    }

    /// Attach a persistence gateway; the session saves through it on every
    /// state change.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load a session from the gateway, or start fresh when nothing is
    /// persisted yet.
    pub fn restore(
        session_id: &str,
        config: SimConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, TradingError> {
        let snapshot = store.load(session_id)?.unwrap_or_default();
        Ok(Self::from_snapshot(session_id, config, snapshot).with_store(store))
    }

    // ==========================================================================
    // Tick Processing
    // ==========================================================================

    /// Process one inbound price tick to completion.
    ///
    /// A fault settling any single order or position is logged and must not
    /// prevent evaluation of the rest of the tick.
    pub fn handle_tick(&self, tick: PriceTick) -> Result<(), TradingError> {
        if !tick.is_valid() {
            return Err(TradingError::InvalidInput(format!(
                "rejected tick for {:?}: price {}",
                tick.market, tick.price
            )));
        }

        let market = tick.market.clone();
        let price = tick.price;

        self.prices.update(tick);
        self.emit(SessionEvent::PriceUpdated {
            market: market.clone(),
            price,
        });

        self.check_pending_orders(&market, price);
        self.mark_positions(&market, price);

        self.persist();
        Ok(())
    }

    // ==========================================================================
    // Session State
    // ==========================================================================

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The market the user is actively watching; the pending-order monitor
    /// is scoped to it under the default scan policy.
    pub fn set_active_market(&self, market: impl Into<String>) {
        *self.active_market.write().unwrap() = Some(market.into());
    }

    pub fn active_market(&self) -> Option<String> {
        self.active_market.read().unwrap().clone()
    }

    pub fn set_timezone(&self, timezone: impl Into<String>) {
        *self.timezone.write().unwrap() = timezone.into();
        self.persist();
    }

    pub fn balance(&self, currency: &str) -> f64 {
        self.ledger.get(currency)
    }

    pub fn last_price(&self, market: &str) -> Option<f64> {
        self.prices.last_price(market)
    }

    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.pending.read().unwrap().clone()
    }

    pub fn positions(&self) -> Vec<LeveragePosition> {
        self.positions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn position(&self, position_id: &str) -> Option<LeveragePosition> {
        self.positions.get(position_id).map(|entry| entry.clone())
    }

    /// Journal records in chronological (accounting) order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.journal.entries()
    }

    /// Journal records newest-first, for recency displays.
    pub fn recent_transactions(&self) -> Vec<Transaction> {
        self.journal.recent_first()
    }

    /// Average purchase price of the current spot holding of `currency`.
    pub fn average_cost(&self, currency: &str) -> f64 {
        self.journal
            .average_cost(currency, self.ledger.get(currency))
    }

    /// Point-in-time session metrics.
    pub fn summary(&self) -> SessionSummary {
        let positions = self.positions();
        let margin_in_use: f64 = positions.iter().map(|p| p.margin).sum();
        let unrealized_pnl: f64 = positions.iter().map(|p| p.pnl).sum();
        let cash_balance = self.ledger.get(&self.config.quote_currency);

        SessionSummary {
            quote_currency: self.config.quote_currency.clone(),
            cash_balance,
            margin_in_use,
            unrealized_pnl,
            equity: cash_balance + margin_in_use + unrealized_pnl,
            open_positions: positions.len(),
            open_orders: self.pending.read().unwrap().len(),
            transactions: self.journal.len(),
        }
    }

    /// The persisted shape handed to the gateway.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            balances: self.ledger.snapshot(),
            transactions: self.journal.entries(),
            pending_orders: self.pending.read().unwrap().clone(),
            leverage_positions: self.positions(),
            timezone: self.timezone.read().unwrap().clone(),
        }
    }

    // ==========================================================================
    // Events & Persistence
    // ==========================================================================

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // Ignore errors when no collaborator is listening.
        let _ = self.events.send(event);
    }

    /// Save through the gateway if one is attached. Failures are logged and
    /// never propagate into the engine.
    pub(crate) fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.session_id, &self.snapshot()) {
                warn!("failed to persist session {}: {}", self.session_id, e);
            }
        }
    }
}

/// Validate a `BASE/QUOTE` market symbol at the command boundary.
pub(crate) fn parse_market(market: &str) -> Result<(&str, &str), TradingError> {
    crate::types::split_market(market)
        .ok_or_else(|| TradingError::InvalidInput(format!("malformed market symbol {}", market)))
}

/// A quote-currency shortfall on the paying side reads as "insufficient
/// funds" rather than a generic balance error.
pub(crate) fn into_insufficient_funds(error: TradingError) -> TradingError {
    match error {
        TradingError::InsufficientBalance {
            needed, available, ..
        } => TradingError::InsufficientFunds { needed, available },
        other => other,
    }
}
