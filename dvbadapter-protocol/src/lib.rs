//! Record formats for the dvbadapterd adapter subsystem.
//!
//! This crate defines the data exchanged at the boundary of the adapter
//! subsystem: the persisted per-adapter and per-mux records, the status
//! record emitted to notification consumers, and the frontend description
//! reported by the hardware.
//!
//! # Example
//!
//! ```rust
//! use dvbadapter_protocol::{AdapterRecord, DeliverySystem};
//!
//! let record = AdapterRecord {
//!     kind: DeliverySystem::Ofdm.as_str().to_string(),
//!     idlescan: Some(1),
//!     ..Default::default()
//! };
//! assert_eq!(record.delivery_system().unwrap(), DeliverySystem::Ofdm);
//! ```

pub mod error;
pub mod frontend;
pub mod types;

pub use error::ProtocolError;
pub use frontend::{caps, frontend_options, FrontendInfo, FrontendOption, OptionList};
pub use types::{
    AdapterRecord, AdapterStatus, DeliverySystem, HardwareStatus, HostConnection, MuxRecord,
    Polarisation, TuningParams, ADAPTER_NAMESPACE, MUX_NAMESPACE, STATUS_TYPE,
};
