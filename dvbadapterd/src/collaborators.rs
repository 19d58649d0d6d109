//! Interfaces to the subsystems around the adapter layer.
//!
//! Services, the EPG grabber, the tuning backend, status consumers and the
//! debug dump sink all live outside this crate. The adapter layer only talks
//! to them through the traits below.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dvbadapter_protocol::AdapterStatus;
use log::{debug, info};

use crate::adapter::{Adapter, Mux, MuxId};

/// A program service receiving packets from the adapter it is attached to.
///
/// `recv_packet` is called on the ingestion thread with the delivery lock
/// held. Implementations must not call back into the registry from there.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Mux this service is carried on.
    fn mux(&self) -> &MuxId;

    /// Subscription weight; non-zero means somebody is watching.
    fn weight(&self) -> u32;

    fn recv_packet(&self, packet: &[u8]);

    /// Drop all subscribers, called when the service is detached.
    fn flush_subscribers(&self) {}
}

/// EPG grabber interface used by the scan scheduler.
pub trait EpgGrabber: Send + Sync {
    /// Next mux this adapter should dwell on for EPG collection.
    fn next_mux(&self, adapter: &Adapter) -> Option<MuxId>;

    /// Dwell time wanted for `mux`.
    fn period(&self, mux: &MuxId) -> Duration;

    /// End collection on `mux`. `timeout` is set when the dwell expired.
    fn stop_mux(&self, mux: &MuxId, timeout: bool);
}

/// Backend that programs the frontend for a mux.
pub trait MuxTuner: Send + Sync {
    fn tune(&self, adapter: &Adapter, mux: &Mux, reason: &str) -> io::Result<()>;

    fn stop(&self, _adapter: &Adapter, _mux: &Mux) {}
}

/// Consumer of adapter status records.
pub trait Notifier: Send + Sync {
    fn notify(&self, status: &AdapterStatus);
}

/// Opens the raw stream dump written while a mux is tuned.
pub trait DumpOpener: Send + Sync {
    fn open(&self, adapter: &str, mux: &MuxId) -> io::Result<Box<dyn Write + Send>>;
}

/// EPG grabber that never asks for a mux.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEpg;

impl EpgGrabber for NoEpg {
    fn next_mux(&self, _adapter: &Adapter) -> Option<MuxId> {
        None
    }

    fn period(&self, _mux: &MuxId) -> Duration {
        Duration::ZERO
    }

    fn stop_mux(&self, _mux: &MuxId, _timeout: bool) {}
}

/// Tuning backend that only records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTuner;

impl MuxTuner for LoggingTuner {
    fn tune(&self, adapter: &Adapter, mux: &Mux, reason: &str) -> io::Result<()> {
        info!(
            "Adapter \"{}\": tune request for mux \"{}\" ({})",
            adapter.display_name(),
            mux.id,
            reason
        );
        Ok(())
    }
}

/// Writes status records to the debug log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, status: &AdapterStatus) {
        match serde_json::to_string(status) {
            Ok(json) => debug!("Adapter status: {}", json),
            Err(e) => debug!("Adapter status for {} not serializable: {}", status.identifier, e),
        }
    }
}

/// Dumps into `<dir>/dvbdump_<adapter>_<mux>.ts`.
#[derive(Debug, Clone)]
pub struct FileDumps {
    dir: PathBuf,
}

impl FileDumps {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, adapter: &str, mux: &MuxId) -> PathBuf {
        self.dir.join(format!("dvbdump_{}_{}.ts", adapter, mux))
    }
}

impl DumpOpener for FileDumps {
    fn open(&self, adapter: &str, mux: &MuxId) -> io::Result<Box<dyn Write + Send>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(adapter, mux);
        let file = File::create(&path)?;
        info!("Dumping raw stream to {}", path.display());
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// The set of collaborators an adapter registry works with.
#[derive(Clone)]
pub struct Collaborators {
    pub epg: Arc<dyn EpgGrabber>,
    pub tuner: Arc<dyn MuxTuner>,
    pub notifier: Arc<dyn Notifier>,
    pub dumps: Arc<dyn DumpOpener>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            epg: Arc::new(NoEpg),
            tuner: Arc::new(LoggingTuner),
            notifier: Arc::new(LogNotifier),
            dumps: Arc::new(FileDumps::new(std::env::temp_dir())),
        }
    }
}
