//! Record type definitions for the adapter subsystem.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Settings namespace holding one record per adapter identifier.
pub const ADAPTER_NAMESPACE: &str = "dvbadapters";

/// Settings namespace holding mux records, nested per adapter identifier.
pub const MUX_NAMESPACE: &str = "dvbmuxes";

/// Value of the `type` field in every status record.
pub const STATUS_TYPE: &str = "dvb";

/// Frontend delivery system, as reported by the driver's frontend type.
///
/// Numbering follows the Linux DVB `fe_type` enumeration:
/// - 0: QPSK (DVB-S, satellite)
/// - 1: QAM (DVB-C, cable)
/// - 2: OFDM (DVB-T, terrestrial)
/// - 3: ATSC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverySystem {
    Qpsk = 0,
    Qam = 1,
    Ofdm = 2,
    Atsc = 3,
}

impl DeliverySystem {
    /// Map a frontend type code from the driver.
    pub fn from_fe_type(code: u32) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(DeliverySystem::Qpsk),
            1 => Ok(DeliverySystem::Qam),
            2 => Ok(DeliverySystem::Ofdm),
            3 => Ok(DeliverySystem::Atsc),
            other => Err(ProtocolError::UnknownFrontendType(other)),
        }
    }

    /// Name used in persisted records and status reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverySystem::Qpsk => "DVB-S",
            DeliverySystem::Qam => "DVB-C",
            DeliverySystem::Ofdm => "DVB-T",
            DeliverySystem::Atsc => "ATSC",
        }
    }

    /// Satellite frontends need LNB power and DiSEqC handling.
    pub fn is_satellite(&self) -> bool {
        *self == DeliverySystem::Qpsk
    }
}

impl fmt::Display for DeliverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliverySystem {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DVB-S" => Ok(DeliverySystem::Qpsk),
            "DVB-C" => Ok(DeliverySystem::Qam),
            "DVB-T" => Ok(DeliverySystem::Ofdm),
            "ATSC" => Ok(DeliverySystem::Atsc),
            other => Err(ProtocolError::UnknownDeliverySystem(other.to_string())),
        }
    }
}

/// How the adapter is attached to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostConnection {
    #[default]
    Unknown,
    /// USB 1.1 full speed.
    Usb12,
    /// USB 2.0 high speed.
    Usb480,
    /// USB 3.0 super speed.
    Usb5000,
    Pci,
}

impl HostConnection {
    /// Classify a USB link from its sysfs `speed` attribute (Mbit/s).
    pub fn from_usb_speed(mbits: u32) -> Self {
        match mbits {
            12 => HostConnection::Usb12,
            480 => HostConnection::Usb480,
            5000 => HostConnection::Usb5000,
            _ => HostConnection::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostConnection::Unknown => "Unknown",
            HostConnection::Usb12 => "USB (12 Mbit/s)",
            HostConnection::Usb480 => "USB (480 Mbit/s)",
            HostConnection::Usb5000 => "USB (5000 Mbit/s)",
            HostConnection::Pci => "PCI",
        }
    }
}

impl fmt::Display for HostConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-adapter record, stored under `dvbadapters/<identifier>`.
///
/// Flags are integer valued. A missing key leaves the corresponding
/// in-memory value untouched when the record is merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autodiscovery: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idlescan: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_checksubscr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qmon: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_muxes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poweroff: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nitoid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diseqc_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrapriority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_initialscan: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_pmt_monitor: Option<u32>,
}

impl AdapterRecord {
    /// Parse the declared delivery system of this record.
    pub fn delivery_system(&self) -> Result<DeliverySystem, ProtocolError> {
        self.kind.parse()
    }
}

/// Satellite polarisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarisation {
    Horizontal = 0,
    Vertical = 1,
    CircularLeft = 2,
    CircularRight = 3,
}

impl Polarisation {
    /// Single-letter code used in mux names and identifiers.
    pub fn code(&self) -> char {
        match self {
            Polarisation::Horizontal => 'H',
            Polarisation::Vertical => 'V',
            Polarisation::CircularLeft => 'L',
            Polarisation::CircularRight => 'R',
        }
    }
}

impl FromStr for Polarisation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "H" => Ok(Polarisation::Horizontal),
            "V" => Ok(Polarisation::Vertical),
            "L" => Ok(Polarisation::CircularLeft),
            "R" => Ok(Polarisation::CircularRight),
            other => Err(ProtocolError::UnknownPolarisation(other.to_string())),
        }
    }
}

/// Tuning parameters of a mux.
///
/// Frequencies are in kHz for satellite and Hz otherwise, as the frontend
/// expects them. Optional fields carry the raw frontend enumeration value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningParams {
    pub frequency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polarisation: Option<Polarisation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u32>,
}

impl TuningParams {
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            ..Default::default()
        }
    }

    pub fn with_symbol_rate(mut self, symbol_rate: u32) -> Self {
        self.symbol_rate = Some(symbol_rate);
        self
    }

    pub fn with_polarisation(mut self, polarisation: Polarisation) -> Self {
        self.polarisation = Some(polarisation);
        self
    }
}

/// Persisted mux record, stored under `dvbmuxes/<adapter>/<mux>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxRecord {
    #[serde(flatten)]
    pub tuning: TuningParams,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<u16>,
}

fn default_quality() -> u8 {
    100
}

/// Status/summary record emitted on query and on every persisting change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub identifier: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub services: u32,
    pub muxes: u32,
    #[serde(rename = "initialMuxes")]
    pub initial_muxes: u32,
    #[serde(rename = "currentMux", default, skip_serializing_if = "Option::is_none")]
    pub current_mux: Option<String>,
    /// Present only while the adapter hardware is present.
    #[serde(flatten)]
    pub hardware: Option<HardwareStatus>,
}

/// Hardware part of the status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub path: String,
    pub hostconnection: String,
    pub devicename: String,
    #[serde(rename = "deliverySystem")]
    pub delivery_system: String,
    #[serde(rename = "satConf")]
    pub sat_conf: bool,
    #[serde(rename = "freqMin")]
    pub freq_min: u32,
    #[serde(rename = "freqMax")]
    pub freq_max: u32,
    #[serde(rename = "freqStep")]
    pub freq_step: u32,
    #[serde(rename = "symrateMin")]
    pub symrate_min: u32,
    #[serde(rename = "symrateMax")]
    pub symrate_max: u32,
}
