use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Small string key-value store used to persist the last known location.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> color_eyre::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> color_eyre::Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> color_eyre::Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened location store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> color_eyre::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> color_eyre::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> color_eyre::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| color_eyre::eyre::eyre!("location store lock poisoned"))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> color_eyre::Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> color_eyre::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> color_eyre::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| color_eyre::eyre::eyre!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> color_eyre::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| color_eyre::eyre::eyre!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Opens the SQLite store, falling back to memory so the client still runs
/// (without persistence) when the file can't be opened.
pub fn open_store(path: &str) -> Arc<dyn KeyValueStore> {
    match SqliteStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                "Could not open location store '{}': {}. Using in-memory store.",
                path, e
            );
            Arc::new(MemoryStore::default())
        }
    }
}
