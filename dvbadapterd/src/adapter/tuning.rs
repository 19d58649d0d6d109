//! Tuning an adapter to a mux and releasing it again.

use log::{info, warn};

use super::{Adapter, Mux, MuxId};
use crate::collaborators::Collaborators;

impl Adapter {
    /// Tune to `id`. Any other current mux is stopped first (as a retune)
    /// and the hardware is started if needed.
    ///
    /// Returns false when the mux is unknown or the tuning backend failed;
    /// in the latter case the mux goes back to a scan bucket.
    pub fn tune(&mut self, id: &MuxId, reason: &str, collab: &Collaborators) -> bool {
        if !self.muxes.contains_key(id) {
            warn!("Adapter \"{}\": no mux \"{}\" to tune to", self.display_name, id);
            return false;
        }

        match self.current_mux() {
            Some(current) if &current == id => {
                self.queues.remove(id);
                return true;
            }
            Some(current) => self.stop_mux(&current, true, collab),
            None => {}
        }

        self.start();
        self.queues.remove(id);

        let dump = if self.config.dump_muxes {
            match collab.dumps.open(&self.identifier, id) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    warn!("Adapter \"{}\": unable to open dump file: {}", self.display_name, e);
                    None
                }
            }
        } else {
            None
        };

        {
            let mut delivery = self.delivery.lock();
            delivery.current_mux = Some(id.clone());
            delivery.dump = dump;
        }

        let result = match self.muxes.get(id) {
            Some(mux) => {
                info!(
                    "Adapter \"{}\": tuning to \"{}\" ({})",
                    self.display_name,
                    mux.nice_name(self.delivery_system.is_satellite()),
                    reason
                );
                collab.tuner.tune(self, mux, reason)
            }
            None => Ok(()),
        };

        if let Err(e) = result {
            warn!("Adapter \"{}\": tuning to \"{}\" failed: {}", self.display_name, id, e);
            self.clear_current(id);
            self.requeue(id);
            return false;
        }
        true
    }

    /// Release `id`. The mux is put back into a scan bucket. Unless this is
    /// a retune the hardware is stopped as well.
    pub fn stop_mux(&mut self, id: &MuxId, retune: bool, collab: &Collaborators) {
        if let Some(mux) = self.muxes.get(id) {
            collab.tuner.stop(self, mux);
        }
        self.clear_current(id);
        self.requeue(id);

        if !retune {
            self.stop();
        }
    }

    /// Remove a mux with everything that refers to it.
    pub(crate) fn destroy_mux(&mut self, id: &MuxId, collab: &Collaborators) -> Option<Mux> {
        if !self.muxes.contains_key(id) {
            return None;
        }
        if self.current_mux().as_ref() == Some(id) {
            self.stop_mux(id, false, collab);
        }
        if self.epg_mux.as_ref() == Some(id) {
            self.epg_mux = None;
        }
        self.queues.remove(id);

        let detached: Vec<_> = {
            let mut delivery = self.delivery.lock();
            let (gone, kept): (Vec<_>, Vec<_>) =
                delivery.services.drain(..).partition(|s| s.mux() == id);
            delivery.services = kept;
            gone
        };
        for service in &detached {
            service.flush_subscribers();
        }

        self.muxes.remove(id)
    }

    fn clear_current(&self, id: &MuxId) {
        let mut delivery = self.delivery.lock();
        if delivery.current_mux.as_ref() == Some(id) {
            delivery.current_mux = None;
            delivery.dump = None;
        }
    }

    fn requeue(&mut self, id: &MuxId) {
        if self.queues.slot_of(id).is_some() {
            return;
        }
        if let Some(mux) = self.muxes.get(id) {
            let bucket = mux.requeue_bucket(self.queues.bucket_count());
            self.queues.push_bucket(id.clone(), bucket);
        }
    }
}
