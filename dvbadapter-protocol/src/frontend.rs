//! Frontend information and capability-derived option lists.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::DeliverySystem;

/// Frontend description reported by the driver (FE_GET_INFO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendInfo {
    pub name: String,
    pub delivery_system: DeliverySystem,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub caps: u32,
}

/// Frontend capability bits (`fe_caps`).
pub mod caps {
    pub const INVERSION_AUTO: u32 = 0x1;
    pub const FEC_1_2: u32 = 0x2;
    pub const FEC_2_3: u32 = 0x4;
    pub const FEC_3_4: u32 = 0x8;
    pub const FEC_4_5: u32 = 0x10;
    pub const FEC_5_6: u32 = 0x20;
    pub const FEC_6_7: u32 = 0x40;
    pub const FEC_7_8: u32 = 0x80;
    pub const FEC_8_9: u32 = 0x100;
    pub const FEC_AUTO: u32 = 0x200;
    pub const QPSK: u32 = 0x400;
    pub const QAM_16: u32 = 0x800;
    pub const QAM_32: u32 = 0x1000;
    pub const QAM_64: u32 = 0x2000;
    pub const QAM_128: u32 = 0x4000;
    pub const QAM_256: u32 = 0x8000;
    pub const QAM_AUTO: u32 = 0x10000;
    pub const TRANSMISSION_MODE_AUTO: u32 = 0x20000;
    pub const BANDWIDTH_AUTO: u32 = 0x40000;
    pub const GUARD_INTERVAL_AUTO: u32 = 0x80000;
    pub const HIERARCHY_AUTO: u32 = 0x100000;
}

/// Frontend enumeration values, as passed to the tuning ioctls.
mod value {
    pub const QPSK: u32 = 0;
    pub const QAM_16: u32 = 1;
    pub const QAM_32: u32 = 2;
    pub const QAM_64: u32 = 3;
    pub const QAM_128: u32 = 4;
    pub const QAM_256: u32 = 5;
    pub const QAM_AUTO: u32 = 6;
    pub const PSK_8: u32 = 9;
    pub const APSK_16: u32 = 10;
    pub const APSK_32: u32 = 11;

    pub const SYS_UNDEFINED: u32 = 0;
    pub const SYS_DVBS: u32 = 5;
    pub const SYS_DVBS2: u32 = 6;

    pub const TRANSMISSION_MODE_2K: u32 = 0;
    pub const TRANSMISSION_MODE_8K: u32 = 1;
    pub const TRANSMISSION_MODE_AUTO: u32 = 2;

    pub const BANDWIDTH_8_MHZ: u32 = 0;
    pub const BANDWIDTH_7_MHZ: u32 = 1;
    pub const BANDWIDTH_6_MHZ: u32 = 2;
    pub const BANDWIDTH_AUTO: u32 = 3;

    pub const GUARD_INTERVAL_1_32: u32 = 0;
    pub const GUARD_INTERVAL_1_16: u32 = 1;
    pub const GUARD_INTERVAL_1_8: u32 = 2;
    pub const GUARD_INTERVAL_1_4: u32 = 3;
    pub const GUARD_INTERVAL_AUTO: u32 = 4;

    pub const HIERARCHY_NONE: u32 = 0;
    pub const HIERARCHY_1: u32 = 1;
    pub const HIERARCHY_2: u32 = 2;
    pub const HIERARCHY_4: u32 = 3;
    pub const HIERARCHY_AUTO: u32 = 4;

    pub const FEC_NONE: u32 = 0;
    pub const FEC_1_2: u32 = 1;
    pub const FEC_2_3: u32 = 2;
    pub const FEC_3_4: u32 = 3;
    pub const FEC_4_5: u32 = 4;
    pub const FEC_5_6: u32 = 5;
    pub const FEC_6_7: u32 = 6;
    pub const FEC_7_8: u32 = 7;
    pub const FEC_8_9: u32 = 8;
    pub const FEC_AUTO: u32 = 9;
    pub const FEC_3_5: u32 = 10;
    pub const FEC_9_10: u32 = 11;
}

/// Named option lists a settings UI can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionList {
    Constellations,
    DeliverySystems,
    TransmissionModes,
    Bandwidths,
    GuardIntervals,
    Hierarchies,
    Fec,
    Polarisations,
}

impl FromStr for OptionList {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constellations" => Ok(OptionList::Constellations),
            "delsys" => Ok(OptionList::DeliverySystems),
            "transmissionmodes" => Ok(OptionList::TransmissionModes),
            "bandwidths" => Ok(OptionList::Bandwidths),
            "guardintervals" => Ok(OptionList::GuardIntervals),
            "hierarchies" => Ok(OptionList::Hierarchies),
            "fec" => Ok(OptionList::Fec),
            "polarisations" => Ok(OptionList::Polarisations),
            other => Err(ProtocolError::UnknownOptionList(other.to_string())),
        }
    }
}

/// One selectable frontend setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontendOption {
    pub title: &'static str,
    pub id: u32,
}

fn opt(title: &'static str, id: u32) -> FrontendOption {
    FrontendOption { title, id }
}

/// Build the option list supported by a frontend with the given caps.
pub fn frontend_options(caps_mask: u32, list: OptionList) -> Vec<FrontendOption> {
    let has = |bit: u32| caps_mask & bit != 0;
    let mut out = Vec::new();

    match list {
        OptionList::Constellations => {
            if has(caps::QAM_AUTO) {
                out.push(opt("Auto", value::QAM_AUTO));
            }
            if has(caps::QPSK) {
                out.push(opt("QPSK", value::QPSK));
                out.push(opt("PSK_8", value::PSK_8));
                out.push(opt("APSK_16", value::APSK_16));
                out.push(opt("APSK_32", value::APSK_32));
            }
            for (bit, title, id) in [
                (caps::QAM_16, "QAM-16", value::QAM_16),
                (caps::QAM_32, "QAM-32", value::QAM_32),
                (caps::QAM_64, "QAM-64", value::QAM_64),
                (caps::QAM_128, "QAM-128", value::QAM_128),
                (caps::QAM_256, "QAM-256", value::QAM_256),
            ] {
                if has(bit) {
                    out.push(opt(title, id));
                }
            }
        }
        OptionList::DeliverySystems => {
            if has(caps::QPSK) {
                out.push(opt("SYS_DVBS", value::SYS_DVBS));
                out.push(opt("SYS_DVBS2", value::SYS_DVBS2));
            } else {
                out.push(opt("SYS_UNDEFINED", value::SYS_UNDEFINED));
            }
        }
        OptionList::TransmissionModes => {
            if has(caps::TRANSMISSION_MODE_AUTO) {
                out.push(opt("Auto", value::TRANSMISSION_MODE_AUTO));
            }
            out.push(opt("2k", value::TRANSMISSION_MODE_2K));
            out.push(opt("8k", value::TRANSMISSION_MODE_8K));
        }
        OptionList::Bandwidths => {
            if has(caps::BANDWIDTH_AUTO) {
                out.push(opt("Auto", value::BANDWIDTH_AUTO));
            }
            out.push(opt("8 MHz", value::BANDWIDTH_8_MHZ));
            out.push(opt("7 MHz", value::BANDWIDTH_7_MHZ));
            out.push(opt("6 MHz", value::BANDWIDTH_6_MHZ));
        }
        OptionList::GuardIntervals => {
            if has(caps::GUARD_INTERVAL_AUTO) {
                out.push(opt("Auto", value::GUARD_INTERVAL_AUTO));
            }
            out.push(opt("1/32", value::GUARD_INTERVAL_1_32));
            out.push(opt("1/16", value::GUARD_INTERVAL_1_16));
            out.push(opt("1/8", value::GUARD_INTERVAL_1_8));
            out.push(opt("1/4", value::GUARD_INTERVAL_1_4));
        }
        OptionList::Hierarchies => {
            if has(caps::HIERARCHY_AUTO) {
                out.push(opt("Auto", value::HIERARCHY_AUTO));
            }
            out.push(opt("None", value::HIERARCHY_NONE));
            out.push(opt("1", value::HIERARCHY_1));
            out.push(opt("2", value::HIERARCHY_2));
            out.push(opt("4", value::HIERARCHY_4));
        }
        OptionList::Fec => {
            if has(caps::FEC_AUTO) {
                out.push(opt("Auto", value::FEC_AUTO));
            }
            out.extend([
                opt("None", value::FEC_NONE),
                opt("1/2", value::FEC_1_2),
                opt("2/3", value::FEC_2_3),
                opt("3/4", value::FEC_3_4),
                opt("4/5", value::FEC_4_5),
                opt("3/5", value::FEC_3_5),
                opt("5/6", value::FEC_5_6),
                opt("6/7", value::FEC_6_7),
                opt("7/8", value::FEC_7_8),
                opt("8/9", value::FEC_8_9),
                opt("9/10", value::FEC_9_10),
            ]);
        }
        OptionList::Polarisations => {
            out.extend([
                opt("Horizontal", 0),
                opt("Vertical", 1),
                opt("Circular left", 2),
                opt("Circular right", 3),
            ]);
        }
    }

    out
}
