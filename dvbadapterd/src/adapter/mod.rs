//! DVB adapters: configuration, mux ownership, hardware lifecycle and
//! tuning.

pub mod device;
mod lifecycle;
pub mod mux;
mod tuning;

pub use device::{DevicePaths, DvbHardware, Frontend, LinuxDvb};
pub use mux::{Mux, MuxId, QueueSlot, ScanQueueSet, SCAN_QUEUE_COUNT};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dvbadapter_protocol::{
    AdapterRecord, AdapterStatus, DeliverySystem, FrontendInfo, HardwareStatus, HostConnection,
    STATUS_TYPE,
};

use crate::collaborators::Service;
use crate::ingest::{DeliveryLock, IngestHandle};

/// Highest supported DiSEqC version (0 = 1.0, 1 = 1.1).
pub const DISEQC_VERSION_MAX: u32 = 1;

/// Stable adapter identifier: `<root>_<frontend name>` with every byte that
/// is not ASCII alphanumeric replaced by `_`.
pub fn derive_identifier(root: &Path, device_name: &str) -> String {
    format!("{}_{}", root.display(), device_name)
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                b as char
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-adapter settings, persisted under `dvbadapters/<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub autodiscovery: bool,
    pub idlescan: bool,
    pub skip_checksubscr: bool,
    pub qmon: bool,
    pub dump_muxes: bool,
    pub poweroff: bool,
    pub nitoid: u32,
    pub diseqc_version: u32,
    pub extrapriority: u32,
    pub skip_initialscan: bool,
    pub disable_pmt_monitor: bool,
}

impl AdapterConfig {
    /// Settings of a freshly discovered adapter.
    pub fn defaults_for(delivery_system: DeliverySystem) -> Self {
        Self {
            autodiscovery: !delivery_system.is_satellite(),
            idlescan: true,
            skip_checksubscr: false,
            qmon: false,
            dump_muxes: false,
            poweroff: false,
            nitoid: 0,
            diseqc_version: 0,
            extrapriority: 0,
            skip_initialscan: false,
            disable_pmt_monitor: false,
        }
    }

    /// Overlay the keys present in `record`.
    pub fn merge(&mut self, record: &AdapterRecord) {
        fn flag(dst: &mut bool, src: Option<u32>) {
            if let Some(v) = src {
                *dst = v != 0;
            }
        }
        fn value(dst: &mut u32, src: Option<u32>) {
            if let Some(v) = src {
                *dst = v;
            }
        }

        flag(&mut self.autodiscovery, record.autodiscovery);
        flag(&mut self.idlescan, record.idlescan);
        flag(&mut self.skip_checksubscr, record.skip_checksubscr);
        flag(&mut self.qmon, record.qmon);
        flag(&mut self.dump_muxes, record.dump_muxes);
        flag(&mut self.poweroff, record.poweroff);
        value(&mut self.nitoid, record.nitoid);
        value(&mut self.diseqc_version, record.diseqc_version);
        value(&mut self.extrapriority, record.extrapriority);
        flag(&mut self.skip_initialscan, record.skip_initialscan);
        flag(&mut self.disable_pmt_monitor, record.disable_pmt_monitor);
        self.diseqc_version = self.diseqc_version.min(DISEQC_VERSION_MAX);
    }
}

/// One DVB adapter, either backed by hardware or a placeholder carrying
/// persisted configuration for hardware that is currently absent.
pub struct Adapter {
    pub(crate) identifier: String,
    pub(crate) display_name: String,
    pub(crate) delivery_system: DeliverySystem,
    pub(crate) config: AdapterConfig,
    /// Adapter slot number, `None` for placeholders.
    pub(crate) slot: Option<u32>,
    /// Device nodes, `None` for placeholders.
    pub(crate) paths: Option<DevicePaths>,
    pub(crate) frontend_info: Option<FrontendInfo>,
    pub(crate) host_connection: HostConnection,
    pub(crate) muxes: BTreeMap<MuxId, Mux>,
    pub(crate) queues: ScanQueueSet,
    /// Mux the EPG grabber is dwelling on.
    pub(crate) epg_mux: Option<MuxId>,
    pub(crate) hardware: Arc<dyn DvbHardware>,
    /// Open frontend while started.
    pub(crate) frontend: Option<Box<dyn Frontend>>,
    /// Ingestion thread while started.
    pub(crate) ingest: Option<IngestHandle>,
    pub(crate) delivery: Arc<DeliveryLock>,
}

impl Adapter {
    /// An adapter found at `paths` with the given frontend.
    pub fn discovered(
        slot: u32,
        paths: DevicePaths,
        info: FrontendInfo,
        host_connection: HostConnection,
        hardware: Arc<dyn DvbHardware>,
    ) -> Self {
        let identifier = derive_identifier(&paths.root, &info.name);
        let delivery_system = info.delivery_system;
        Self {
            identifier,
            display_name: info.name.clone(),
            delivery_system,
            config: AdapterConfig::defaults_for(delivery_system),
            slot: Some(slot),
            paths: Some(paths),
            frontend_info: Some(info),
            host_connection,
            muxes: BTreeMap::new(),
            queues: ScanQueueSet::default(),
            epg_mux: None,
            hardware,
            frontend: None,
            ingest: None,
            delivery: DeliveryLock::new(),
        }
    }

    /// A placeholder for configuration whose hardware is absent.
    pub fn placeholder(
        identifier: impl Into<String>,
        delivery_system: DeliverySystem,
        hardware: Arc<dyn DvbHardware>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            display_name: identifier.clone(),
            identifier,
            delivery_system,
            config: AdapterConfig::defaults_for(delivery_system),
            slot: None,
            paths: None,
            frontend_info: None,
            host_connection: HostConnection::Unknown,
            muxes: BTreeMap::new(),
            queues: ScanQueueSet::default(),
            epg_mux: None,
            hardware,
            frontend: None,
            ingest: None,
            delivery: DeliveryLock::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn delivery_system(&self) -> DeliverySystem {
        self.delivery_system
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Whether hardware backs this adapter.
    pub fn is_present(&self) -> bool {
        self.paths.is_some()
    }

    pub fn muxes(&self) -> impl Iterator<Item = &Mux> {
        self.muxes.values()
    }

    pub fn mux(&self, id: &MuxId) -> Option<&Mux> {
        self.muxes.get(id)
    }

    pub fn queues(&self) -> &ScanQueueSet {
        &self.queues
    }

    pub fn epg_mux(&self) -> Option<&MuxId> {
        self.epg_mux.as_ref()
    }

    /// Mux currently tuned, read under the delivery lock.
    pub fn current_mux(&self) -> Option<MuxId> {
        self.delivery.lock().current_mux.clone()
    }

    /// Total subscription weight of the attached services.
    pub fn subscription_weight(&self) -> u32 {
        self.delivery.lock().weight()
    }

    /// Apply a persisted record on top of the current settings.
    pub fn apply_record(&mut self, record: &AdapterRecord) {
        if let Some(name) = &record.displayname {
            self.display_name = name.clone();
        }
        self.config.merge(record);
    }

    /// Full record for persisting.
    pub fn to_record(&self) -> AdapterRecord {
        let c = &self.config;
        AdapterRecord {
            kind: self.delivery_system.as_str().to_string(),
            displayname: Some(self.display_name.clone()),
            autodiscovery: Some(c.autodiscovery as u32),
            idlescan: Some(c.idlescan as u32),
            skip_checksubscr: Some(c.skip_checksubscr as u32),
            qmon: Some(c.qmon as u32),
            dump_muxes: Some(c.dump_muxes as u32),
            poweroff: Some(c.poweroff as u32),
            nitoid: Some(c.nitoid),
            diseqc_version: Some(c.diseqc_version),
            extrapriority: Some(c.extrapriority),
            skip_initialscan: Some(c.skip_initialscan as u32),
            disable_pmt_monitor: Some(c.disable_pmt_monitor as u32),
        }
    }

    /// Add a mux and queue it for scanning. Returns false when a mux with
    /// the same id already exists.
    pub(crate) fn insert_mux(&mut self, mux: Mux, initial_scan: bool) -> bool {
        if self.muxes.contains_key(&mux.id) {
            return false;
        }
        let id = mux.id.clone();
        if initial_scan {
            self.queues.push_initial(id.clone());
        } else {
            let bucket = mux.requeue_bucket(self.queues.bucket_count());
            self.queues.push_bucket(id.clone(), bucket);
        }
        self.muxes.insert(id, mux);
        true
    }

    pub(crate) fn attach_service(&self, service: Arc<dyn Service>) {
        self.delivery.lock().services.push(service);
    }

    /// Detach the named service, flushing its subscribers.
    pub(crate) fn detach_service(&self, name: &str) -> bool {
        let removed = {
            let mut delivery = self.delivery.lock();
            let (gone, kept): (Vec<_>, Vec<_>) = delivery
                .services
                .drain(..)
                .partition(|s| s.name() == name);
            delivery.services = kept;
            gone
        };
        for service in &removed {
            service.flush_subscribers();
        }
        !removed.is_empty()
    }

    /// Detach every service.
    pub(crate) fn detach_all_services(&self) -> usize {
        let removed = std::mem::take(&mut self.delivery.lock().services);
        for service in &removed {
            service.flush_subscribers();
        }
        removed.len()
    }

    /// Status record for notification consumers.
    pub fn status(&self) -> AdapterStatus {
        let current = self.current_mux();
        let hardware = match (&self.paths, &self.frontend_info) {
            (Some(paths), Some(info)) => {
                let satellite = self.delivery_system.is_satellite();
                let fdiv = if satellite { 1 } else { 1000 };
                Some(HardwareStatus {
                    path: paths.root.display().to_string(),
                    hostconnection: self.host_connection.as_str().to_string(),
                    devicename: info.name.clone(),
                    delivery_system: self.delivery_system.as_str().to_string(),
                    sat_conf: satellite,
                    freq_min: info.frequency_min / fdiv,
                    freq_max: info.frequency_max / fdiv,
                    freq_step: info.frequency_stepsize / fdiv,
                    symrate_min: info.symbol_rate_min,
                    symrate_max: info.symbol_rate_max,
                })
            }
            _ => None,
        };

        AdapterStatus {
            identifier: self.identifier.clone(),
            name: self.display_name.clone(),
            kind: STATUS_TYPE.to_string(),
            services: self.muxes.values().map(|m| m.services.len() as u32).sum(),
            muxes: self.muxes.len() as u32,
            initial_muxes: self.queues.initial_len() as u32,
            current_mux: current.and_then(|id| {
                self.muxes
                    .get(&id)
                    .map(|m| m.nice_name(self.delivery_system.is_satellite()))
            }),
            hardware,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake hardware shared by the adapter, scheduler and registry tests.

    use super::*;
    use std::collections::HashMap;
    use std::fs::File;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeHardware {
        pub frontends: Mutex<HashMap<PathBuf, FrontendInfo>>,
        pub frontend_opens: AtomicUsize,
        pub dvr_opens: AtomicUsize,
        pub voltage_offs: Arc<AtomicUsize>,
        /// Write ends of the pipes handed out as dvr devices.
        pub dvr_writers: Mutex<Vec<File>>,
    }

    impl FakeHardware {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn add_frontend(&self, dev_root: &Path, slot: u32, info: FrontendInfo) {
            let paths = DevicePaths::for_slot(dev_root, slot);
            self.frontends.lock().unwrap().insert(paths.frontend, info);
        }
    }

    struct FakeFrontend {
        voltage_offs: Arc<AtomicUsize>,
    }

    impl Frontend for FakeFrontend {
        fn voltage_off(&self) -> io::Result<()> {
            self.voltage_offs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl DvbHardware for FakeHardware {
        fn query_frontend(&self, path: &Path) -> io::Result<FrontendInfo> {
            self.frontends
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn open_frontend(&self, path: &Path) -> io::Result<Box<dyn Frontend>> {
            self.query_frontend(path)?;
            self.frontend_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeFrontend {
                voltage_offs: Arc::clone(&self.voltage_offs),
            }))
        }

        fn open_dvr(&self, _path: &Path) -> io::Result<File> {
            let (rx, tx) = nix::unistd::pipe()?;
            self.dvr_opens.fetch_add(1, Ordering::SeqCst);
            self.dvr_writers.lock().unwrap().push(File::from(tx));
            Ok(File::from(rx))
        }

        fn host_connection(&self, _slot: u32) -> HostConnection {
            HostConnection::Usb480
        }
    }

    pub fn frontend_info(name: &str, delivery_system: DeliverySystem) -> FrontendInfo {
        FrontendInfo {
            name: name.to_string(),
            delivery_system,
            frequency_min: 950_000,
            frequency_max: 2_150_000,
            frequency_stepsize: 125,
            frequency_tolerance: 0,
            symbol_rate_min: 1_000_000,
            symbol_rate_max: 45_000_000,
            symbol_rate_tolerance: 0,
            caps: 0x400,
        }
    }

    pub fn adapter(hw: &Arc<FakeHardware>, delivery_system: DeliverySystem) -> Adapter {
        let dev_root = Path::new("/dev/dvb");
        let info = frontend_info("Fake Frontend", delivery_system);
        hw.add_frontend(dev_root, 0, info.clone());
        let hardware: Arc<dyn DvbHardware> = hw.clone();
        Adapter::discovered(
            0,
            DevicePaths::for_slot(dev_root, 0),
            info,
            HostConnection::Usb480,
            hardware,
        )
    }
}
