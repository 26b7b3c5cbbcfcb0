use std::env;

/// Which markets the pending-order monitor scans on a price tick.
///
/// The conservative default only evaluates limit orders for the market the
/// user is actively watching; orders on other markets wait until that market
/// becomes active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingScanPolicy {
    /// Only scan orders whose market is the session's active market.
    ActiveMarketOnly,
    /// Scan every order matching the tick's market.
    AllMarkets,
}

impl Default for PendingScanPolicy {
    fn default() -> Self {
        PendingScanPolicy::ActiveMarketOnly
    }
}

/// Simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Currency new sessions are funded in.
    pub quote_currency: String,
    /// Starting balance for a fresh session.
    pub starting_balance: f64,
    /// Fee rate for limit (maker) orders.
    pub maker_fee_rate: f64,
    /// Fee rate for market (taker) orders.
    pub taker_fee_rate: f64,
    /// Minimum equity ratio before forced liquidation.
    pub maintenance_margin_rate: f64,
    /// Margin ratio below which a margin-call warning fires.
    pub margin_call_ratio: f64,
    /// Cooldown before a margin-call warning re-arms (ms).
    pub margin_call_cooldown_ms: i64,
    /// Pending-order scan scope per tick.
    pub pending_scan_policy: PendingScanPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            quote_currency: "USD".to_string(),
            starting_balance: 100_000.0,
            maker_fee_rate: 0.0005, // 0.05%
            taker_fee_rate: 0.001,  // 0.1%
            maintenance_margin_rate: 0.005,
            margin_call_ratio: 0.02,
            margin_call_cooldown_ms: 60_000,
            pending_scan_policy: PendingScanPolicy::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pending_scan_policy = match env::var("PENDING_SCAN_POLICY").ok().as_deref() {
            Some("all_markets") => PendingScanPolicy::AllMarkets,
            Some("active_market") => PendingScanPolicy::ActiveMarketOnly,
            _ => defaults.pending_scan_policy,
        };

        Self {
            quote_currency: env::var("QUOTE_CURRENCY").unwrap_or(defaults.quote_currency),
            starting_balance: env::var("STARTING_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.starting_balance),
            maker_fee_rate: env::var("MAKER_FEE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.maker_fee_rate),
            taker_fee_rate: env::var("TAKER_FEE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.taker_fee_rate),
            maintenance_margin_rate: env::var("MAINTENANCE_MARGIN_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.maintenance_margin_rate),
            margin_call_ratio: env::var("MARGIN_CALL_RATIO")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.margin_call_ratio),
            margin_call_cooldown_ms: env::var("MARGIN_CALL_COOLDOWN_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.margin_call_cooldown_ms),
            pending_scan_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();

        assert_eq!(config.quote_currency, "USD");
        assert_eq!(config.starting_balance, 100_000.0);
        assert!(config.maker_fee_rate < config.taker_fee_rate);
        assert_eq!(config.maintenance_margin_rate, 0.005);
        assert_eq!(config.pending_scan_policy, PendingScanPolicy::ActiveMarketOnly);
    }

    #[test]
    fn test_margin_call_threshold_below_maintenance_band() {
        let config = SimConfig::default();
        // The warning must fire before the position is actually liquidated.
        assert!(config.margin_call_ratio > config.maintenance_margin_rate);
    }
}
