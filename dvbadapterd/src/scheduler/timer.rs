//! Per-adapter scan timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::JoinHandle;

/// Something that can run a scan tick for an adapter.
pub trait ScanTarget: Send + Sync + 'static {
    /// Run one tick. Returns the delay until the next one, or `None` to
    /// end the timer.
    fn scan_tick(&self, identifier: &str) -> Option<Duration>;
}

/// Spawn the timer task for one adapter.
///
/// The tick itself takes blocking locks and may join threads, so it runs on
/// the blocking pool.
pub fn spawn_scan_timer<T: ScanTarget>(
    target: Arc<T>,
    identifier: String,
    first: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next = first;
        loop {
            tokio::time::sleep(next).await;

            let tick_target = Arc::clone(&target);
            let tick_id = identifier.clone();
            match tokio::task::spawn_blocking(move || tick_target.scan_tick(&tick_id)).await {
                Ok(Some(delay)) => next = delay,
                Ok(None) => {
                    debug!("Scan timer for {} finished", identifier);
                    break;
                }
                Err(e) => {
                    error!("Scan tick for {} failed: {}", identifier, e);
                    break;
                }
            }
        }
    })
}

/// All running scan timers, keyed by adapter identifier.
#[derive(Default)]
pub struct ScanTimers {
    handles: HashMap<String, JoinHandle<()>>,
}

impl ScanTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer for `identifier` unless one is already running.
    pub fn arm<T: ScanTarget>(&mut self, target: &Arc<T>, identifier: &str, first: Duration) {
        if let Some(handle) = self.handles.get(identifier) {
            if !handle.is_finished() {
                return;
            }
        }
        let handle = spawn_scan_timer(Arc::clone(target), identifier.to_string(), first);
        self.handles.insert(identifier.to_string(), handle);
    }

    pub fn len(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer and wait for the tasks to go away.
    pub async fn shutdown(&mut self) {
        info!("Stopping {} scan timer(s)", self.len());
        for (_, handle) in self.handles.drain() {
            handle.abort();
            let _ = handle.await;
        }
    }
}
