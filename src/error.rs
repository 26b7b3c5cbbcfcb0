use thiserror::Error;

/// Trading engine errors.
///
/// Every rejection is local and non-fatal: the session's state is exactly as
/// it was before the rejected command.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("insufficient {asset} balance: need {needed}, have {available}")]
    InsufficientBalance {
        asset: String,
        needed: f64,
        available: f64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no price data available for {0}")]
    PriceUnavailable(String),

    #[error("position {0} is already being closed")]
    AlreadyProcessing(String),

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for TradingError {
    fn from(e: rusqlite::Error) -> Self {
        TradingError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(e: serde_json::Error) -> Self {
        TradingError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TradingError>;
