//! Settings store schema definitions.

/// SQL schema for the key-value settings table.
pub const SCHEMA_SQL: &str = r#"
-- Namespaced settings records, one JSON map per key
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,       -- e.g. "dvbadapters/<identifier>"
    value TEXT NOT NULL,                 -- JSON object
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        // Applying twice must be harmless.
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"settings".to_string()));
    }
}
