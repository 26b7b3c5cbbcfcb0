//! Leverage Position Manager
//!
//! Opens, averages, partially/fully closes and force-liquidates margin
//! positions, and recomputes unrealized P&L and margin ratio on every tick.
//!
//! The close path is guarded by a per-position advisory lock so overlapping
//! close requests for the same position are rejected instead of settling
//! twice. The lock is released on every exit path, including errors.

use super::{into_insufficient_funds, parse_market, TradingSession};
use crate::error::TradingError;
use crate::services::OrderClass;
use crate::types::{
    finite_positive, LeveragePosition, PositionClose, PositionSide, SessionEvent, Transaction,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Scoped advisory lock on one position's close path. Dropping the guard
/// releases the lock no matter how the close exits.
pub struct CloseGuard {
    locks: Arc<DashMap<String, ()>>,
    position_id: String,
}

impl CloseGuard {
    fn acquire(locks: &Arc<DashMap<String, ()>>, position_id: &str) -> Option<Self> {
        match locks.entry(position_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(Self {
                    locks: Arc::clone(locks),
                    position_id: position_id.to_string(),
                })
            }
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.position_id);
    }
}

impl TradingSession {
    /// Open a new leveraged position, or average into an existing one with
    /// the same market, side and leverage.
    ///
    /// The opening fee (`margin * leverage * taker rate`) is charged up
    /// front, so a fresh position starts with `pnl = -opening_fee`.
    pub fn open_position(
        &self,
        market: &str,
        side: PositionSide,
        margin: f64,
        leverage: u32,
    ) -> Result<LeveragePosition, TradingError> {
        let (_, quote) = parse_market(market)?;
        if !finite_positive(margin) {
            return Err(TradingError::InvalidInput(format!(
                "margin must be positive, got {}",
                margin
            )));
        }
        if leverage < 1 {
            return Err(TradingError::InvalidInput(
                "leverage must be at least 1".to_string(),
            ));
        }
        let price = self
            .prices
            .last_price(market)
            .ok_or_else(|| TradingError::PriceUnavailable(market.to_string()))?;

        let size = margin * leverage as f64;
        let opening_fee = self.fees.fee(size, OrderClass::Taker);
        self.ledger
            .debit(quote, margin + opening_fee)
            .map_err(into_insufficient_funds)?;

        let existing_id = self
            .positions
            .iter()
            .find(|p| p.market == market && p.side == side && p.leverage == leverage)
            .map(|p| p.id.clone());

        let averaged = existing_id.and_then(|id| {
            let mut entry = self.positions.get_mut(&id)?;
            entry.average_in(
                margin,
                size,
                opening_fee,
                price,
                self.config.maintenance_margin_rate,
            );
            info!(
                "averaged into {} {} position {}: entry {}, size {}",
                entry.market, entry.side, entry.id, entry.entry_price, entry.size
            );
            Some(entry.value().clone())
        });

        let position = match averaged {
            Some(position) => position,
            None => {
                let position = LeveragePosition::new(
                    market.to_string(),
                    side,
                    margin,
                    leverage,
                    price,
                    self.fees.rate(OrderClass::Taker),
                    self.config.maintenance_margin_rate,
                );
                self.positions
                    .insert(position.id.clone(), position.clone());
                info!(
                    "opened {}x {} {} position {} at {}",
                    leverage, side, market, position.id, price
                );
                position
            }
        };

        self.emit(SessionEvent::PositionOpened {
            position: position.clone(),
        });
        self.persist();
        Ok(position)
    }

    /// Close `percentage` (in `(0,100]`) of a position at the current price.
    ///
    /// At 100% the position is removed; otherwise size, margin and opening
    /// fee shrink proportionally in place.
    pub fn close_position(
        &self,
        position_id: &str,
        percentage: f64,
    ) -> Result<Transaction, TradingError> {
        if !finite_positive(percentage) || percentage > 100.0 {
            return Err(TradingError::InvalidInput(format!(
                "close percentage must be in (0, 100], got {}",
                percentage
            )));
        }

        // Held for the whole settlement; a second close attempt while this
        // one is in flight is rejected, not queued.
        let _guard = CloseGuard::acquire(&self.close_locks, position_id)
            .ok_or_else(|| TradingError::AlreadyProcessing(position_id.to_string()))?;

        let position = self
            .positions
            .get(position_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| TradingError::PositionNotFound(position_id.to_string()))?;
        let (_, quote) = parse_market(&position.market)?;
        let exit_price = self
            .prices
            .last_price(&position.market)
            .ok_or_else(|| TradingError::PriceUnavailable(position.market.clone()))?;

        let ratio = percentage / 100.0;
        let raw_pnl = position.raw_pnl_at(exit_price) * ratio;
        let proportional_opening_fee = position.opening_fee * ratio;
        let closing_fee = self.fees.fee(position.size * ratio, OrderClass::Taker);
        let total_fees = proportional_opening_fee + closing_fee;
        let final_pnl = raw_pnl - total_fees;
        let credit_amount = position.margin * ratio + final_pnl;

        if credit_amount >= 0.0 {
            self.ledger.credit(quote, credit_amount);
        } else {
            // Losses beyond the returned collateral are capped at the margin
            // share; the ledger's non-negative invariant protects the rest.
            let owed = (-credit_amount).min(position.margin * ratio);
            self.ledger.debit_up_to(quote, owed);
        }

        if percentage >= 100.0 {
            self.positions.remove(position_id);
        } else if let Some(mut entry) = self.positions.get_mut(position_id) {
            entry.scale_down(1.0 - ratio);
            entry.mark(exit_price);
        }

        let close = PositionClose {
            market: position.market.clone(),
            amount: position.size * ratio,
            price: exit_price,
            total: credit_amount,
            fee: total_fees,
            time: chrono::Utc::now().timestamp_millis(),
            leverage: position.leverage,
            pnl: final_pnl,
            raw_pnl,
            opening_fee: proportional_opening_fee,
            closing_fee,
            entry_price: position.entry_price,
            exit_price,
            percentage,
        };
        let transaction = match position.side {
            PositionSide::Long => Transaction::CloseLong(close),
            PositionSide::Short => Transaction::CloseShort(close),
        };

        self.journal.append(transaction.clone());
        self.emit(SessionEvent::PositionClosed {
            position_id: position_id.to_string(),
            transaction: transaction.clone(),
        });
        info!(
            "closed {}% of position {} at {}: pnl {}",
            percentage, position_id, exit_price, final_pnl
        );

        self.persist();
        Ok(transaction)
    }

    /// Close every open position sequentially, one settlement at a time, so
    /// the per-position lock discipline is never bypassed by fan-out.
    ///
    /// A rejected close (lock held, price missing) is reported per position
    /// and does not abort the sweep.
    pub fn close_all_positions(&self) -> Vec<(String, Result<Transaction, TradingError>)> {
        let ids: Vec<String> = self.positions.iter().map(|p| p.id.clone()).collect();
        ids.into_iter()
            .map(|id| {
                let result = self.close_position(&id, 100.0);
                if let Err(e) = &result {
                    warn!("close-all: position {} not closed: {}", id, e);
                }
                (id, result)
            })
            .collect()
    }

    // ==========================================================================
    // Tick-Driven Updates
    // ==========================================================================

    /// Re-mark every position on this market, then run liquidations and
    /// margin-call warnings.
    pub(crate) fn mark_positions(&self, market: &str, price: f64) {
        let ids: Vec<String> = self
            .positions
            .iter()
            .filter(|p| p.market == market)
            .map(|p| p.id.clone())
            .collect();

        let mut to_liquidate = Vec::new();
        let mut margin_calls = Vec::new();
        let now = chrono::Utc::now().timestamp_millis();

        for id in ids {
            let Some(mut position) = self.positions.get_mut(&id) else {
                continue;
            };
            position.mark(price);

            if position.should_liquidate(price) {
                to_liquidate.push(id);
                continue;
            }

            if position.margin_ratio < self.config.margin_call_ratio {
                let due = match position.margin_call_warned_at {
                    None => true,
                    Some(warned_at) => now - warned_at >= self.config.margin_call_cooldown_ms,
                };
                if due {
                    position.margin_call_warned_at = Some(now);
                    margin_calls.push((id, position.market.clone(), position.margin_ratio));
                }
            } else {
                position.margin_call_warned_at = None;
            }
        }

        for (position_id, market, margin_ratio) in margin_calls {
            warn!(
                "margin call on position {}: margin ratio {:.4}",
                position_id, margin_ratio
            );
            self.emit(SessionEvent::MarginCall {
                position_id,
                market,
                margin_ratio,
            });
        }

        for id in to_liquidate {
            self.force_liquidate(&id, price);
        }
    }

    /// Forcibly liquidate a position: the entire margin is forfeited,
    /// regardless of the unrealized P&L at the liquidation tick.
    ///
    /// Removing the position first makes a second trigger within the same
    /// tick a no-op.
    fn force_liquidate(&self, position_id: &str, exit_price: f64) {
        let Some((_, position)) = self.positions.remove(position_id) else {
            return;
        };

        let raw_pnl = position.raw_pnl_at(exit_price);
        let seized = match parse_market(&position.market) {
            Ok((_, quote)) => self.ledger.debit_up_to(quote, position.margin),
            Err(_) => 0.0,
        };

        let transaction = Transaction::Liquidation(PositionClose {
            market: position.market.clone(),
            amount: position.size,
            price: exit_price,
            total: -seized,
            fee: position.opening_fee,
            time: chrono::Utc::now().timestamp_millis(),
            leverage: position.leverage,
            pnl: -position.margin,
            raw_pnl,
            opening_fee: position.opening_fee,
            closing_fee: 0.0,
            entry_price: position.entry_price,
            exit_price,
            percentage: 100.0,
        });

        self.journal.append(transaction.clone());
        self.emit(SessionEvent::Liquidated {
            position_id: position_id.to_string(),
            transaction,
        });
        warn!(
            "liquidated {} {} position {} at {} (margin {} forfeited)",
            position.market, position.side, position_id, exit_price, position.margin
        );
    }

    /// Acquire a position's close lock out-of-band. Lets a caller embedding
    /// the close in a longer asynchronous flow (confirmation dialogs,
    /// persistence round-trips) hold the position against overlapping close
    /// requests; `close_position` rejects with `AlreadyProcessing` while the
    /// guard lives.
    pub fn try_lock_close(&self, position_id: &str) -> Option<CloseGuard> {
        CloseGuard::acquire(&self.close_locks, position_id)
    }
}
