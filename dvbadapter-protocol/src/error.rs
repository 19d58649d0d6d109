//! Error types for adapter record handling.

use thiserror::Error;

/// Errors raised while interpreting adapter and mux records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Delivery system name is not one of the known frontend types.
    #[error("Unknown delivery system: {0}")]
    UnknownDeliverySystem(String),

    /// Frontend type code reported by the driver is not known.
    #[error("Unknown frontend type: {0}")]
    UnknownFrontendType(u32),

    /// Requested frontend option list does not exist.
    #[error("Unknown frontend option list: {0}")]
    UnknownOptionList(String),

    /// Polarisation code is not one of H/V/L/R.
    #[error("Unknown polarisation: {0}")]
    UnknownPolarisation(String),
}
