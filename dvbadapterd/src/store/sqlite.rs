//! SQLite-backed settings store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::schema;
use super::{Result, SettingsStore, StoreError};

/// Settings store backed by a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_value(key: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| StoreError::InvalidRecord {
        key: key.to_string(),
        source,
    })
}

impl SettingsStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn()
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        text.map(|t| parse_value(key, &t)).transpose()
    }

    fn load_prefix(&self, namespace: &str) -> Result<Vec<(String, Value)>> {
        let prefix = format!("{}/", namespace);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM settings WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map([&prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (key, text) in rows {
            match parse_value(&key, &text) {
                Ok(value) => out.push((key[prefix.len()..].to_string(), value)),
                Err(e) => log::warn!("Skipping unreadable settings record: {}", e),
            }
        }
        Ok(out)
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value).map_err(|source| StoreError::InvalidRecord {
            key: key.to_string(),
            source,
        })?;
        let now = chrono::Utc::now().timestamp();
        self.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_crud() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store.load("dvbadapters/a0").unwrap().is_none());

        store
            .save("dvbadapters/a0", &json!({"type": "DVB-T", "idlescan": 1}))
            .unwrap();
        let value = store.load("dvbadapters/a0").unwrap().unwrap();
        assert_eq!(value["type"], "DVB-T");

        // Overwrite
        store
            .save("dvbadapters/a0", &json!({"type": "DVB-T", "idlescan": 0}))
            .unwrap();
        assert_eq!(store.load("dvbadapters/a0").unwrap().unwrap()["idlescan"], 0);

        store.remove("dvbadapters/a0").unwrap();
        assert!(store.load("dvbadapters/a0").unwrap().is_none());

        // Removing again is fine
        store.remove("dvbadapters/a0").unwrap();
    }

    #[test]
    fn test_load_prefix_is_literal() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save("dvbmuxes/a_0/m1", &json!({"frequency": 1})).unwrap();
        store.save("dvbmuxes/a_0/m2", &json!({"frequency": 2})).unwrap();
        // '_' must not act as a wildcard
        store.save("dvbmuxes/ab0/m3", &json!({"frequency": 3})).unwrap();
        store.save("dvbadapters/a_0", &json!({"type": "DVB-C"})).unwrap();

        let muxes = store.load_prefix("dvbmuxes/a_0").unwrap();
        let keys: Vec<_> = muxes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["m1", "m2"]);

        let adapters = store.load_prefix("dvbadapters").unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].0, "a_0");
    }
}
