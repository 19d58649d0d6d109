//! dvbadapterd: DVB adapter management.
//!
//! - [`registry`]: discovery, persisted configuration and control of all
//!   adapters
//! - [`adapter`]: per-adapter state, hardware lifecycle and tuning
//! - [`scheduler`]: the periodic mux scan
//! - [`ingest`]: TS framing and the per-adapter reader thread
//! - [`store`]: the settings store

pub mod adapter;
pub mod collaborators;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use adapter::{Adapter, Mux, MuxId};
pub use registry::{AdapterRegistry, RegistryError, RegistryOptions};
