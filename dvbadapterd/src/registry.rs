//! Adapter registry.
//!
//! Owns every adapter, discovered or placeholder, and serializes all control
//! operations on them behind one lock. Lock order is the registry control
//! lock first, then an adapter's delivery lock; the ingestion threads only
//! ever take the latter.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dvbadapter_protocol::{
    frontend_options, AdapterRecord, AdapterStatus, FrontendOption, MuxRecord, OptionList,
    TuningParams,
};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::adapter::{
    Adapter, AdapterConfig, DevicePaths, DvbHardware, Mux, MuxId, DISEQC_VERSION_MAX,
};
use crate::collaborators::{Collaborators, Service};
use crate::scheduler::{self, ScanTarget, DEFAULT_SCAN_PERIOD};
use crate::store::{self, SettingsStore, StoreError};

/// Number of adapter slots probed at startup.
pub const MAX_ADAPTERS: u32 = 32;

/// Registry error types.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("Unknown mux {mux} on adapter {adapter}")]
    UnknownMux { adapter: String, mux: String },

    #[error("Adapter {0} has hardware attached")]
    HardwarePresent(String),

    #[error("Cannot copy muxes of adapter {0} onto itself")]
    SameAdapter(String),

    #[error("Record error: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Directory holding the `adapterN` device directories.
    pub dev_root: PathBuf,
    pub scan_period: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev/dvb"),
            scan_period: DEFAULT_SCAN_PERIOD,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    /// In insertion order.
    adapters: Vec<Adapter>,
}

impl RegistryState {
    fn get(&self, identifier: &str) -> Result<&Adapter> {
        self.adapters
            .iter()
            .find(|a| a.identifier() == identifier)
            .ok_or_else(|| RegistryError::UnknownAdapter(identifier.to_string()))
    }

    fn get_mut(&mut self, identifier: &str) -> Result<&mut Adapter> {
        self.adapters
            .iter_mut()
            .find(|a| a.identifier() == identifier)
            .ok_or_else(|| RegistryError::UnknownAdapter(identifier.to_string()))
    }

    fn position(&self, identifier: &str) -> Result<usize> {
        self.adapters
            .iter()
            .position(|a| a.identifier() == identifier)
            .ok_or_else(|| RegistryError::UnknownAdapter(identifier.to_string()))
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// The set of all adapters.
pub struct AdapterRegistry {
    control: Mutex<RegistryState>,
    store: Arc<dyn SettingsStore>,
    hardware: Arc<dyn DvbHardware>,
    collab: Collaborators,
    options: RegistryOptions,
}

impl AdapterRegistry {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        hardware: Arc<dyn DvbHardware>,
        collab: Collaborators,
        options: RegistryOptions,
    ) -> Self {
        Self {
            control: Mutex::new(RegistryState::default()),
            store,
            hardware,
            collab,
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe the slots in `mask`, reconcile with persisted configuration and
    /// load muxes. Returns the identifiers of adapters with hardware.
    pub fn init(&self, mask: u32) -> Result<Vec<String>> {
        self.discover(mask);
        self.load_persisted()?;
        self.load_muxes()?;

        let state = self.lock();
        Ok(state
            .adapters
            .iter()
            .filter(|a| a.is_present())
            .map(|a| a.identifier().to_string())
            .collect())
    }

    /// Probe every adapter slot whose bit is set in `mask`.
    pub fn discover(&self, mask: u32) {
        for slot in 0..MAX_ADAPTERS {
            if mask & (1 << slot) != 0 {
                self.probe_slot(slot);
            }
        }
    }

    fn probe_slot(&self, slot: u32) {
        let paths = DevicePaths::for_slot(&self.options.dev_root, slot);
        let info = match self.hardware.query_frontend(&paths.frontend) {
            Ok(info) => info,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                error!("Unable to query {}: {}", paths.frontend.display(), e);
                return;
            }
        };

        let host_connection = self.hardware.host_connection(slot);
        let adapter = Adapter::discovered(
            slot,
            paths,
            info,
            host_connection,
            Arc::clone(&self.hardware),
        );

        let mut state = self.lock();
        if state.get(adapter.identifier()).is_ok() {
            warn!("Adapter {} already registered, skipping", adapter.identifier());
            return;
        }
        info!(
            "Found adapter {} ({}), {}",
            adapter.identifier(),
            adapter.delivery_system(),
            host_connection
        );
        state.adapters.push(adapter);
    }

    /// Merge persisted adapter records. Records without hardware become
    /// placeholders; records whose type disagrees with the hardware are
    /// ignored.
    pub fn load_persisted(&self) -> Result<()> {
        let records = self.store.load_prefix(dvbadapter_protocol::ADAPTER_NAMESPACE)?;
        let mut state = self.lock();

        for (identifier, value) in records {
            if identifier.contains('/') {
                continue;
            }
            let record: AdapterRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Ignoring adapter record {}: {}", identifier, e);
                    continue;
                }
            };
            let delivery_system = match record.delivery_system() {
                Ok(ds) => ds,
                Err(e) => {
                    warn!("Ignoring adapter record {}: {}", identifier, e);
                    continue;
                }
            };

            match state.get_mut(&identifier) {
                Ok(adapter) => {
                    if adapter.delivery_system() != delivery_system {
                        warn!(
                            "Adapter {}: stored type {} does not match hardware type {}, ignoring",
                            identifier,
                            delivery_system,
                            adapter.delivery_system()
                        );
                        continue;
                    }
                    adapter.apply_record(&record);
                }
                Err(_) => {
                    debug!("Adapter {} has no hardware, keeping its configuration", identifier);
                    let mut adapter = Adapter::placeholder(
                        identifier,
                        delivery_system,
                        Arc::clone(&self.hardware),
                    );
                    adapter.apply_record(&record);
                    state.adapters.push(adapter);
                }
            }
        }
        Ok(())
    }

    /// Load persisted muxes of every adapter into its scan buckets.
    pub fn load_muxes(&self) -> Result<()> {
        let mut state = self.lock();
        for adapter in state.adapters.iter_mut() {
            let records = self.store.load_prefix(&store::mux_namespace(adapter.identifier()))?;
            for (key, value) in records {
                match serde_json::from_value::<MuxRecord>(value) {
                    Ok(record) => {
                        adapter.insert_mux(Mux::from_record(MuxId::new(key), record), false);
                    }
                    Err(e) => warn!("Ignoring mux record {}: {}", key, e),
                }
            }
        }
        Ok(())
    }

    fn persist(&self, adapter: &Adapter) -> Result<()> {
        let value = serde_json::to_value(adapter.to_record())?;
        self.store.save(&store::adapter_key(adapter.identifier()), &value)?;
        Ok(())
    }

    fn persist_mux(&self, adapter: &Adapter, mux: &Mux) -> Result<()> {
        let value = serde_json::to_value(mux.to_record())?;
        self.store
            .save(&store::mux_key(adapter.identifier(), mux.id.as_str()), &value)?;
        Ok(())
    }

    fn notify(&self, adapter: &Adapter) {
        self.collab.notifier.notify(&adapter.status());
    }

    /// Identifiers of all adapters, in registry order.
    pub fn identifiers(&self) -> Vec<String> {
        self.lock()
            .adapters
            .iter()
            .map(|a| a.identifier().to_string())
            .collect()
    }

    /// Status record of one adapter.
    pub fn status(&self, identifier: &str) -> Result<AdapterStatus> {
        Ok(self.lock().get(identifier)?.status())
    }

    /// Status records of all adapters.
    pub fn list(&self) -> Vec<AdapterStatus> {
        self.lock().adapters.iter().map(Adapter::status).collect()
    }

    /// Run `f` on an adapter under the control lock.
    pub fn with_adapter<T>(&self, identifier: &str, f: impl FnOnce(&Adapter) -> T) -> Result<T> {
        Ok(f(self.lock().get(identifier)?))
    }

    pub fn set_display_name(&self, identifier: &str, name: &str) -> Result<bool> {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier)?;
        if adapter.display_name == name {
            return Ok(false);
        }
        info!(
            "Adapter \"{}\" renamed to \"{}\"",
            adapter.display_name, name
        );
        adapter.display_name = name.to_string();
        self.persist(adapter)?;
        self.notify(adapter);
        Ok(true)
    }

    /// Change one configuration field. Unchanged values are a no-op;
    /// otherwise the change is logged, persisted and notified.
    fn update_config<T, F, D>(&self, identifier: &str, value: T, field: F, describe: D) -> Result<bool>
    where
        T: PartialEq,
        F: FnOnce(&mut AdapterConfig) -> &mut T,
        D: FnOnce(&str, &T) -> String,
    {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier)?;
        let slot = field(&mut adapter.config);
        if *slot == value {
            return Ok(false);
        }
        info!("{}", describe(&adapter.display_name, &value));
        *slot = value;
        self.persist(adapter)?;
        self.notify(adapter);
        Ok(true)
    }

    pub fn set_auto_discovery(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.autodiscovery, |name, on| {
            format!("Adapter \"{}\" mux autodiscovery set to: {}", name, on_off(*on))
        })
    }

    pub fn set_idle_scan(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.idlescan, |name, on| {
            format!("Adapter \"{}\" idle mux scanning set to: {}", name, on_off(*on))
        })
    }

    pub fn set_skip_initial_scan(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.skip_initialscan, |name, on| {
            format!("Adapter \"{}\" skip initial scan set to: {}", name, on_off(*on))
        })
    }

    pub fn set_skip_subscriber_check(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.skip_checksubscr, |name, on| {
            format!(
                "Adapter \"{}\" skip service availability check when mapping set to: {}",
                name,
                on_off(*on)
            )
        })
    }

    pub fn set_quality_monitor(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.qmon, |name, on| {
            format!("Adapter \"{}\" quality monitoring set to: {}", name, on_off(*on))
        })
    }

    pub fn set_dump_muxes(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.dump_muxes, |name, on| {
            format!("Adapter \"{}\" dump of DVB mux input set to: {}", name, on_off(*on))
        })
    }

    pub fn set_power_off(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.poweroff, |name, on| {
            format!("Adapter \"{}\" idle poweroff set to: {}", name, on_off(*on))
        })
    }

    pub fn set_nit_original_network(&self, identifier: &str, nitoid: u32) -> Result<bool> {
        self.update_config(identifier, nitoid, |c| &mut c.nitoid, |name, v| {
            format!("Adapter \"{}\" NIT original network id set to: {}", name, v)
        })
    }

    /// Values above the highest supported version are clamped.
    pub fn set_diseqc_version(&self, identifier: &str, version: u32) -> Result<bool> {
        let version = version.min(DISEQC_VERSION_MAX);
        self.update_config(identifier, version, |c| &mut c.diseqc_version, |name, v| {
            format!("Adapter \"{}\" DiSEqC version set to: 1.{}", name, v)
        })
    }

    pub fn set_extra_priority(&self, identifier: &str, priority: u32) -> Result<bool> {
        self.update_config(identifier, priority, |c| &mut c.extrapriority, |name, v| {
            format!("Adapter \"{}\" extra priority set to: {}", name, v)
        })
    }

    pub fn set_disable_pmt_monitor(&self, identifier: &str, on: bool) -> Result<bool> {
        self.update_config(identifier, on, |c| &mut c.disable_pmt_monitor, |name, on| {
            format!("Adapter \"{}\" disabled PMT monitoring set to: {}", name, on_off(*on))
        })
    }

    /// Add a mux with the given tuning parameters. Adding a mux that already
    /// exists returns its id and changes nothing.
    pub fn add_mux(&self, identifier: &str, tuning: TuningParams) -> Result<MuxId> {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier)?;
        let mux = Mux::new(adapter.identifier(), tuning);
        let id = mux.id.clone();
        if adapter.mux(&id).is_some() {
            return Ok(id);
        }

        self.persist_mux(adapter, &mux)?;
        let initial = !adapter.config.skip_initialscan;
        adapter.insert_mux(mux, initial);
        debug!("Adapter \"{}\": added mux {}", adapter.display_name, id);
        self.notify(adapter);
        Ok(id)
    }

    /// Remove a mux, stopping it first if it is tuned.
    pub fn remove_mux(&self, identifier: &str, mux: &MuxId) -> Result<()> {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier)?;
        if adapter.mux(mux).is_none() {
            return Err(RegistryError::UnknownMux {
                adapter: identifier.to_string(),
                mux: mux.to_string(),
            });
        }
        // Persisted record before the in-memory mux.
        self.store.remove(&store::mux_key(identifier, mux.as_str()))?;
        adapter.destroy_mux(mux, &self.collab);
        self.notify(adapter);
        Ok(())
    }

    /// Replace every mux of `dst` with copies of the muxes of `src`.
    pub fn clone_muxes(&self, dst: &str, src: &str) -> Result<()> {
        if dst == src {
            return Err(RegistryError::SameAdapter(dst.to_string()));
        }

        let mut state = self.lock();
        let source: Vec<Mux> = state.get(src)?.muxes().cloned().collect();
        let adapter = state.get_mut(dst)?;

        let existing: Vec<MuxId> = adapter.muxes.keys().cloned().collect();
        for id in existing {
            self.store.remove(&store::mux_key(dst, id.as_str()))?;
            adapter.destroy_mux(&id, &self.collab);
        }

        let initial = !adapter.config.skip_initialscan;
        for src_mux in source {
            let mut mux = Mux::new(adapter.identifier(), src_mux.tuning);
            mux.network = src_mux.network;
            mux.services = src_mux.services;
            self.persist_mux(adapter, &mux)?;
            adapter.insert_mux(mux, initial);
        }

        info!(
            "Adapter \"{}\": copied {} mux(es) from {}",
            adapter.display_name,
            adapter.muxes.len(),
            src
        );
        self.persist(adapter)?;
        self.notify(adapter);
        Ok(())
    }

    /// Delete a placeholder adapter together with its muxes and persisted
    /// records. Adapters with hardware cannot be deleted.
    pub fn destroy(&self, identifier: &str) -> Result<()> {
        let mut state = self.lock();
        let index = state.position(identifier)?;
        let adapter = &mut state.adapters[index];
        if adapter.is_present() {
            return Err(RegistryError::HardwarePresent(identifier.to_string()));
        }

        // Mux records first, the adapter record last.
        let muxes: Vec<MuxId> = adapter.muxes.keys().cloned().collect();
        for id in &muxes {
            self.store.remove(&store::mux_key(identifier, id.as_str()))?;
        }
        self.store.remove(&store::adapter_key(identifier))?;

        for id in muxes {
            adapter.destroy_mux(&id, &self.collab);
        }
        adapter.detach_all_services();

        state.adapters.remove(index);
        info!("Adapter {} deleted", identifier);
        Ok(())
    }

    /// Detach every service from an adapter.
    pub fn clean(&self, identifier: &str) -> Result<usize> {
        let state = self.lock();
        let adapter = state.get(identifier)?;
        let removed = adapter.detach_all_services();
        debug!("Adapter \"{}\": detached {} service(s)", adapter.display_name, removed);
        Ok(removed)
    }

    /// Attach a service. It must be carried on a mux of this adapter.
    pub fn attach_service(&self, identifier: &str, service: Arc<dyn Service>) -> Result<()> {
        let state = self.lock();
        let adapter = state.get(identifier)?;
        if adapter.mux(service.mux()).is_none() {
            return Err(RegistryError::UnknownMux {
                adapter: identifier.to_string(),
                mux: service.mux().to_string(),
            });
        }
        adapter.attach_service(service);
        Ok(())
    }

    pub fn detach_service(&self, identifier: &str, name: &str) -> Result<bool> {
        Ok(self.lock().get(identifier)?.detach_service(name))
    }

    pub fn start(&self, identifier: &str) -> Result<()> {
        self.lock().get_mut(identifier)?.start();
        Ok(())
    }

    pub fn stop(&self, identifier: &str) -> Result<()> {
        self.lock().get_mut(identifier)?.stop();
        Ok(())
    }

    /// Tune an adapter to one of its muxes.
    pub fn tune(&self, identifier: &str, mux: &MuxId, reason: &str) -> Result<bool> {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier)?;
        if adapter.mux(mux).is_none() {
            return Err(RegistryError::UnknownMux {
                adapter: identifier.to_string(),
                mux: mux.to_string(),
            });
        }
        Ok(adapter.tune(mux, reason, &self.collab))
    }

    /// Option list supported by an adapter's frontend, `None` for
    /// placeholders.
    pub fn frontend_options(
        &self,
        identifier: &str,
        list: OptionList,
    ) -> Result<Option<Vec<FrontendOption>>> {
        let state = self.lock();
        let adapter = state.get(identifier)?;
        Ok(adapter
            .frontend_info
            .as_ref()
            .map(|info| frontend_options(info.caps, list)))
    }

    /// Stop every adapter.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        for adapter in state.adapters.iter_mut() {
            if let Some(current) = adapter.current_mux() {
                adapter.stop_mux(&current, false, &self.collab);
            }
            adapter.stop();
        }
        info!("All adapters stopped");
    }
}

impl ScanTarget for AdapterRegistry {
    fn scan_tick(&self, identifier: &str) -> Option<Duration> {
        let mut state = self.lock();
        let adapter = state.get_mut(identifier).ok()?;
        scheduler::tick(adapter, &self.collab, self.options.scan_period).rearm
    }
}
