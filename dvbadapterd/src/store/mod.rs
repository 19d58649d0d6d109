//! Key-value settings storage.
//!
//! Records are JSON maps stored under namespaced keys:
//! - `dvbadapters/<identifier>`: per-adapter configuration
//! - `dvbmuxes/<identifier>/<mux>`: per-mux tuning parameters

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use dvbadapter_protocol::{ADAPTER_NAMESPACE, MUX_NAMESPACE};
use serde_json::Value;
use thiserror::Error;

/// Settings store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid record at {key}: {source}")]
    InvalidRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence collaborator: load/save/remove records by namespaced key.
pub trait SettingsStore: Send + Sync {
    /// Load the record stored at `key`.
    fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Load every record directly below `namespace`.
    ///
    /// Returned keys are relative to the namespace (`"a/b"` for
    /// `"<namespace>/a/b"`), ordered by key.
    fn load_prefix(&self, namespace: &str) -> Result<Vec<(String, Value)>>;

    /// Store `value` at `key`, replacing any previous record.
    fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove the record at `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Key of an adapter's configuration record.
pub fn adapter_key(identifier: &str) -> String {
    format!("{}/{}", ADAPTER_NAMESPACE, identifier)
}

/// Namespace holding all mux records of one adapter.
pub fn mux_namespace(identifier: &str) -> String {
    format!("{}/{}", MUX_NAMESPACE, identifier)
}

/// Key of one mux record.
pub fn mux_key(identifier: &str, mux: &str) -> String {
    format!("{}/{}/{}", MUX_NAMESPACE, identifier, mux)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(adapter_key("_dev_dvb_adapter0_X"), "dvbadapters/_dev_dvb_adapter0_X");
        assert_eq!(mux_namespace("a0"), "dvbmuxes/a0");
        assert_eq!(mux_key("a0", "a0_506000000"), "dvbmuxes/a0/a0_506000000");
    }
}
