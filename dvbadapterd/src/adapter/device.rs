//! Access to the Linux DVB device nodes.
//!
//! [`DvbHardware`] is the seam between the adapter layer and the kernel;
//! [`LinuxDvb`] talks to `/dev/dvb` through ioctls, tests substitute fakes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use dvbadapter_protocol::{DeliverySystem, FrontendInfo, HostConnection};

/// `SEC_VOLTAGE_OFF` from `fe_sec_voltage`.
const SEC_VOLTAGE_OFF: i32 = 2;

/// Device nodes of one adapter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    /// `<dev_root>/adapterN`
    pub root: PathBuf,
    pub frontend: PathBuf,
    pub demux: PathBuf,
    pub dvr: PathBuf,
}

impl DevicePaths {
    pub fn for_slot(dev_root: &Path, slot: u32) -> Self {
        let root = dev_root.join(format!("adapter{}", slot));
        Self {
            frontend: root.join("frontend0"),
            demux: root.join("demux0"),
            dvr: root.join("dvr0"),
            root,
        }
    }
}

/// An open frontend device. Closing happens on drop.
pub trait Frontend: Send {
    /// Cut LNB power.
    fn voltage_off(&self) -> io::Result<()>;
}

/// Kernel-facing operations the adapter layer needs.
pub trait DvbHardware: Send + Sync {
    /// Open the frontend just long enough to read its description.
    fn query_frontend(&self, path: &Path) -> io::Result<FrontendInfo>;

    fn open_frontend(&self, path: &Path) -> io::Result<Box<dyn Frontend>>;

    /// Open the dvr device for non-blocking reads.
    fn open_dvr(&self, path: &Path) -> io::Result<File>;

    fn host_connection(&self, slot: u32) -> HostConnection;
}

mod ioctl {
    use std::ffi::c_char;

    /// `struct dvb_frontend_info`
    #[repr(C)]
    pub struct RawFrontendInfo {
        pub name: [c_char; 128],
        pub fe_type: u32,
        pub frequency_min: u32,
        pub frequency_max: u32,
        pub frequency_stepsize: u32,
        pub frequency_tolerance: u32,
        pub symbol_rate_min: u32,
        pub symbol_rate_max: u32,
        pub symbol_rate_tolerance: u32,
        pub notifier_delay: u32,
        pub caps: u32,
    }

    nix::ioctl_read!(fe_get_info, b'o', 61, RawFrontendInfo);
    nix::ioctl_write_int_bad!(fe_set_voltage, nix::request_code_none!(b'o', 67));
}

use ioctl::RawFrontendInfo;

impl RawFrontendInfo {
    fn zeroed() -> Self {
        Self {
            name: [0; 128],
            fe_type: 0,
            frequency_min: 0,
            frequency_max: 0,
            frequency_stepsize: 0,
            frequency_tolerance: 0,
            symbol_rate_min: 0,
            symbol_rate_max: 0,
            symbol_rate_tolerance: 0,
            notifier_delay: 0,
            caps: 0,
        }
    }

    fn name(&self) -> String {
        let bytes: Vec<u8> = self
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn open_nonblocking(path: &Path, write: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
}

struct LinuxFrontend {
    file: File,
}

impl Frontend for LinuxFrontend {
    fn voltage_off(&self) -> io::Result<()> {
        // SAFETY: FE_SET_VOLTAGE takes its argument by value.
        unsafe { ioctl::fe_set_voltage(self.file.as_raw_fd(), SEC_VOLTAGE_OFF) }?;
        Ok(())
    }
}

/// The real `/dev/dvb` backend.
#[derive(Debug, Clone)]
pub struct LinuxDvb {
    sysfs_root: PathBuf,
}

impl Default for LinuxDvb {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl LinuxDvb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DvbHardware for LinuxDvb {
    fn query_frontend(&self, path: &Path) -> io::Result<FrontendInfo> {
        let file = open_nonblocking(path, true)?;
        let mut raw = RawFrontendInfo::zeroed();
        // SAFETY: `raw` matches the kernel's struct dvb_frontend_info layout.
        unsafe { ioctl::fe_get_info(file.as_raw_fd(), &mut raw) }?;

        let delivery_system = DeliverySystem::from_fe_type(raw.fe_type)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(FrontendInfo {
            name: raw.name(),
            delivery_system,
            frequency_min: raw.frequency_min,
            frequency_max: raw.frequency_max,
            frequency_stepsize: raw.frequency_stepsize,
            frequency_tolerance: raw.frequency_tolerance,
            symbol_rate_min: raw.symbol_rate_min,
            symbol_rate_max: raw.symbol_rate_max,
            symbol_rate_tolerance: raw.symbol_rate_tolerance,
            caps: raw.caps,
        })
    }

    fn open_frontend(&self, path: &Path) -> io::Result<Box<dyn Frontend>> {
        let file = open_nonblocking(path, true)?;
        Ok(Box::new(LinuxFrontend { file }))
    }

    fn open_dvr(&self, path: &Path) -> io::Result<File> {
        open_nonblocking(path, false)
    }

    fn host_connection(&self, slot: u32) -> HostConnection {
        let link = self
            .sysfs_root
            .join(format!("class/dvb/dvb{}.dvr0/device", slot));
        match fs::canonicalize(link) {
            Ok(device) => classify_device(&device),
            Err(_) => HostConnection::Unknown,
        }
    }
}

/// Work out the bus type of a sysfs device directory.
///
/// USB devices have a `speed` attribute on an ancestor directory; anything
/// outside the USB tree is treated as PCI.
fn classify_device(device: &Path) -> HostConnection {
    if !device.to_string_lossy().contains("/usb") {
        return HostConnection::Pci;
    }
    device
        .ancestors()
        .find_map(|dir| fs::read_to_string(dir.join("speed")).ok())
        .and_then(|speed| speed.trim().parse::<u32>().ok())
        .map(HostConnection::from_usb_speed)
        .unwrap_or_default()
}
