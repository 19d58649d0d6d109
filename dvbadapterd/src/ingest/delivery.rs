//! State shared between an adapter and its ingestion thread.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::adapter::MuxId;
use crate::collaborators::Service;

/// Everything the ingestion thread reads while dispatching packets.
#[derive(Default)]
pub struct Delivery {
    /// Mux currently tuned, if any.
    pub current_mux: Option<MuxId>,
    /// Services attached to the adapter.
    pub services: Vec<Arc<dyn Service>>,
    /// Raw stream dump sink.
    pub dump: Option<Box<dyn Write + Send>>,
}

impl Delivery {
    /// Service to feed for the current mux: the first attached service
    /// bound to it.
    pub fn target(&self) -> Option<Arc<dyn Service>> {
        let mux = self.current_mux.as_ref()?;
        self.services.iter().find(|s| s.mux() == mux).cloned()
    }

    /// Sum of the subscription weights of all attached services, saturating
    /// at `u32::MAX`.
    pub fn weight(&self) -> u32 {
        self.services
            .iter()
            .fold(0u32, |acc, s| acc.saturating_add(s.weight()))
    }
}

/// The delivery lock. Always taken after the registry control lock.
#[derive(Default)]
pub struct DeliveryLock {
    inner: Mutex<Delivery>,
}

impl DeliveryLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lock(&self) -> MutexGuard<'_, Delivery> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
