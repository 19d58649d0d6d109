//! Opening and closing the hardware of an adapter.

use std::sync::Arc;

use log::{debug, error, warn};

use super::Adapter;
use crate::ingest::IngestHandle;

impl Adapter {
    /// Whether the frontend is open.
    pub fn is_started(&self) -> bool {
        self.frontend.is_some()
    }

    /// Whether the ingestion thread is running. A started adapter whose
    /// thread died on a read error reports false here.
    pub fn is_ingesting(&self) -> bool {
        self.ingest.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Open the frontend and start ingestion. Calling this on a started
    /// adapter or a placeholder does nothing, except that an ingestion
    /// thread that has exited is replaced.
    pub fn start(&mut self) {
        let paths = match &self.paths {
            Some(paths) => paths.clone(),
            None => return,
        };

        if self.frontend.is_none() {
            match self.hardware.open_frontend(&paths.frontend) {
                Ok(frontend) => {
                    debug!("{} opened frontend {}", paths.root.display(), paths.frontend.display());
                    self.frontend = Some(frontend);
                }
                Err(e) => {
                    error!("Unable to open {}: {}", paths.frontend.display(), e);
                    return;
                }
            }
        }

        if self.ingest.as_ref().map_or(false, |h| h.is_finished()) {
            if let Some(handle) = self.ingest.take() {
                debug!("{} reaping exited dvr thread", paths.root.display());
                handle.stop();
            }
        }

        if self.ingest.is_none() {
            let hardware = Arc::clone(&self.hardware);
            let dvr = paths.dvr.clone();
            match IngestHandle::spawn(
                self.identifier.clone(),
                move || hardware.open_dvr(&dvr),
                Arc::clone(&self.delivery),
            ) {
                Ok(handle) => {
                    debug!("{} started dvr thread", paths.root.display());
                    self.ingest = Some(handle);
                }
                Err(e) => error!("{} unable to start dvr thread: {}", paths.root.display(), e),
            }
        }
    }

    /// Power off, close the frontend and stop ingestion. Calling this on a
    /// stopped adapter does nothing.
    pub fn stop(&mut self) {
        let root = match &self.paths {
            Some(paths) => paths.root.clone(),
            None => return,
        };

        self.power_off();

        if let Some(frontend) = self.frontend.take() {
            debug!("{} closing frontend", root.display());
            drop(frontend);
        }

        if let Some(handle) = self.ingest.take() {
            debug!("{} stopping thread", root.display());
            handle.stop();
            debug!("{} stopped thread", root.display());
        }
    }

    /// Cut LNB power on an open satellite frontend when power-off is
    /// enabled.
    pub fn power_off(&self) {
        let frontend = match &self.frontend {
            Some(frontend) => frontend,
            None => return,
        };
        if !self.config.poweroff || !self.delivery_system.is_satellite() {
            return;
        }

        match frontend.voltage_off() {
            Ok(()) => debug!("\"{}\" is off", self.display_name),
            Err(e) => warn!("\"{}\" unable to power off: {}", self.display_name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Adapter;
    use dvbadapter_protocol::DeliverySystem;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn wait_for(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);

        a.start();
        a.start();
        assert!(a.is_started());
        assert!(a.is_ingesting());
        assert_eq!(hw.frontend_opens.load(Ordering::SeqCst), 1);
        wait_for(|| hw.dvr_opens.load(Ordering::SeqCst) == 1);

        a.stop();
        assert!(!a.is_started());
        assert!(!a.is_ingesting());
        a.stop();

        a.start();
        assert_eq!(hw.frontend_opens.load(Ordering::SeqCst), 2);
        a.stop();
    }

    #[test]
    fn test_stop_without_start() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Qpsk);
        a.config.poweroff = true;
        a.stop();
        assert_eq!(hw.voltage_offs.load(Ordering::SeqCst), 0);
        assert_eq!(hw.frontend_opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_placeholder_never_opens() {
        let hw = FakeHardware::new();
        let mut a = Adapter::placeholder("gone", DeliverySystem::Ofdm, hw.clone());
        a.start();
        assert!(!a.is_started());
        a.stop();
        assert_eq!(hw.frontend_opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_power_off_conditions() {
        let hw = FakeHardware::new();

        let mut sat = adapter(&hw, DeliverySystem::Qpsk);
        sat.start();
        sat.power_off();
        assert_eq!(hw.voltage_offs.load(Ordering::SeqCst), 0);

        sat.config.poweroff = true;
        sat.stop();
        assert_eq!(hw.voltage_offs.load(Ordering::SeqCst), 1);

        let mut terr = adapter(&hw, DeliverySystem::Ofdm);
        terr.config.poweroff = true;
        terr.start();
        terr.stop();
        assert_eq!(hw.voltage_offs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_respawns_exited_ingestion() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);

        a.start();
        wait_for(|| hw.dvr_writers.lock().unwrap().len() == 1);
        assert!(a.is_ingesting());

        // EOF on the dvr device ends the thread; the frontend stays open.
        hw.dvr_writers.lock().unwrap().clear();
        wait_for(|| !a.is_ingesting());
        assert!(a.is_started());

        a.start();
        assert!(a.is_ingesting());
        wait_for(|| hw.dvr_opens.load(Ordering::SeqCst) == 2);
        assert_eq!(hw.frontend_opens.load(Ordering::SeqCst), 1);

        a.stop();
        assert!(!a.is_ingesting());
    }
}
