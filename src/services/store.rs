//! Persistence gateway.
//!
//! The engine hands a [`SessionSnapshot`] to a [`SessionStore`] on every
//! state change and loads the same shape back on session start. Save
//! failures are logged by the caller and never fatal to the engine.

use crate::error::TradingError;
use crate::types::SessionSnapshot;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Save/load interface the trading core persists through.
pub trait SessionStore: Send + Sync {
    fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), TradingError>;
    fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, TradingError>;
}

/// SQLite-backed session store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, TradingError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite session store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, TradingError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite session store initialized");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), TradingError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl SessionStore for SqliteStore {
    fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), TradingError> {
        let state = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sessions (id, state, updated_at) VALUES (?1, ?2, ?3)",
            params![session_id, state, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, TradingError> {
        let conn = self.conn.lock().unwrap();
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        match state {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// In-memory session store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, SessionSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), TradingError> {
        self.sessions
            .insert(session_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, TradingError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_round_trip() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.load("s1").unwrap().is_none());

        let mut snapshot = SessionSnapshot::default();
        snapshot.balances.insert("USD".to_string(), 1234.5);
        snapshot.timezone = "UTC".to_string();

        store.save("s1", &snapshot).unwrap();
        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.balances["USD"], 1234.5);
        assert_eq!(loaded.timezone, "UTC");
    }

    #[test]
    fn test_sqlite_save_overwrites() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut snapshot = SessionSnapshot::default();

        snapshot.balances.insert("USD".to_string(), 1.0);
        store.save("s1", &snapshot).unwrap();

        snapshot.balances.insert("USD".to_string(), 2.0);
        store.save("s1", &snapshot).unwrap();

        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.balances["USD"], 2.0);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let snapshot = SessionSnapshot::default();

        store.save("s1", &snapshot).unwrap();
        assert!(store.load("s1").unwrap().is_some());
        assert!(store.load("other").unwrap().is_none());
    }
}
