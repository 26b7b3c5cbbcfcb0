pub mod fees;
pub mod journal;
pub mod ledger;
pub mod prices;
pub mod session;
pub mod store;

pub use fees::{FeeSchedule, OrderClass};
pub use journal::{replay_average_cost, TransactionJournal};
pub use ledger::BalanceLedger;
pub use prices::MarketPriceTable;
pub use session::{CloseGuard, TradingSession};
pub use store::{MemoryStore, SessionStore, SqliteStore};
